// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ticket resolver: reuse-or-create of the single open conversation per
//! contact, plus status transitions.
//!
//! The reuse-or-create runs inside one transaction per contact so two
//! concurrent inbound events cannot produce two open tickets; the partial
//! unique index on open-family rows is the ultimate arbiter.

use atende_core::AtendeError;
use atende_core::types::{ResolveTicketInput, Ticket, TicketMetadata, TicketStatus};
use rusqlite::{Row, Transaction, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::{find_or_create, new_id, parse_enum, parse_json, to_json};

const TICKET_COLUMNS: &str = "id, tenant_id, contact_id, queue_id, status, channel, tags, \
     metadata, last_message_at, last_message_preview, created_at, updated_at";

fn row_to_ticket(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        contact_id: row.get(2)?,
        queue_id: row.get(3)?,
        status: parse_enum(4, &row.get::<_, String>(4)?)?,
        channel: row.get(5)?,
        tags: parse_json(6, &row.get::<_, String>(6)?)?,
        metadata: parse_json(7, &row.get::<_, String>(7)?)?,
        last_message_at: row.get(8)?,
        last_message_preview: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub(crate) fn get_by_id_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    ticket_id: &str,
) -> rusqlite::Result<Option<Ticket>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {TICKET_COLUMNS} FROM tickets WHERE tenant_id = ?1 AND id = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, ticket_id], row_to_ticket) {
        Ok(ticket) => Ok(Some(ticket)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Newest open-family ticket owned by the contact, if any.
fn open_for_contact_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    contact_id: &str,
) -> rusqlite::Result<Option<Ticket>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {TICKET_COLUMNS} FROM tickets
         WHERE tenant_id = ?1 AND contact_id = ?2
           AND status IN ('open', 'pending', 'assigned')
         ORDER BY updated_at DESC LIMIT 1"
    ))?;
    match stmt.query_row(params![tenant_id, contact_id], row_to_ticket) {
        Ok(ticket) => Ok(Some(ticket)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Find-or-create the default routing queue for a channel, named after it.
fn queue_for_channel(
    tx: &Transaction<'_>,
    tenant_id: &str,
    channel: &str,
) -> rusqlite::Result<String> {
    find_or_create(
        tx,
        |tx| {
            let mut stmt =
                tx.prepare("SELECT id FROM queues WHERE tenant_id = ?1 AND name = ?2")?;
            match stmt.query_row(params![tenant_id, channel], |row| row.get::<_, String>(0)) {
                Ok(id) => Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        },
        |tx| {
            let id = new_id();
            tx.execute(
                "INSERT INTO queues (id, tenant_id, name) VALUES (?1, ?2, ?3)",
                params![id, tenant_id, channel],
            )?;
            Ok(id)
        },
    )
}

/// Write the (possibly patched) metadata for the ticket being updated.
pub(crate) fn write_metadata_tx(
    tx: &Transaction<'_>,
    ticket_id: &str,
    metadata: &TicketMetadata,
    now_ms: i64,
) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE tickets SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
        params![to_json(metadata)?, now_ms, ticket_id],
    )?;
    Ok(())
}

/// Reuse the contact's open ticket or create a fresh OPEN one.
///
/// Reuse patches the metadata chat identifier and instance hint without
/// overwriting values already present. The returned flag reports whether a
/// ticket was created by this call.
pub async fn resolve_open_ticket(
    db: &Database,
    input: ResolveTicketInput,
    now_ms: i64,
) -> Result<(Ticket, bool), AtendeError> {
    let ResolveTicketInput {
        tenant_id,
        contact_id,
        channel,
        chat_id,
        instance_id,
    } = input;

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            if let Some(mut ticket) = open_for_contact_tx(&tx, &tenant_id, &contact_id)? {
                let mut metadata = ticket.metadata.clone();
                if metadata.chat_id.is_none() {
                    metadata.chat_id = chat_id.clone();
                }
                if metadata.instance_id.is_none() {
                    metadata.instance_id = instance_id.clone();
                }
                write_metadata_tx(&tx, &ticket.id, &metadata, now_ms)?;
                ticket.metadata = metadata;
                ticket.updated_at = now_ms;
                debug!(ticket_id = %ticket.id, "reusing open ticket");
                tx.commit()?;
                return Ok((ticket, false));
            }

            let queue_id = queue_for_channel(&tx, &tenant_id, &channel)?;
            let mut was_created = false;
            let ticket = find_or_create(
                &tx,
                |tx| open_for_contact_tx(tx, &tenant_id, &contact_id),
                |tx| {
                    let id = new_id();
                    let metadata = TicketMetadata {
                        chat_id: chat_id.clone(),
                        instance_id: instance_id.clone(),
                        ..Default::default()
                    };
                    tx.execute(
                        "INSERT INTO tickets (id, tenant_id, contact_id, queue_id, status, \
                         channel, tags, metadata, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, 'open', ?5, '[]', ?6, ?7, ?7)",
                        params![id, tenant_id, contact_id, queue_id, channel, to_json(&metadata)?, now_ms],
                    )?;
                    let created = get_by_id_tx(tx, &tenant_id, &id)?
                        .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                    was_created = true;
                    debug!(ticket_id = %id, contact_id = %contact_id, "ticket opened");
                    Ok(created)
                },
            )?;
            tx.commit()?;
            Ok((ticket, was_created))
        })
        .await
        .map_err(map_tr_err)
}

/// Get a ticket by id, scoped to a tenant.
pub async fn get_ticket(
    db: &Database,
    tenant_id: &str,
    ticket_id: &str,
) -> Result<Option<Ticket>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let ticket_id = ticket_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let ticket = get_by_id_tx(&tx, &tenant_id, &ticket_id)?;
            tx.commit()?;
            Ok(ticket)
        })
        .await
        .map_err(map_tr_err)
}

/// Transition a ticket's status (soft close included). Returns `None` when
/// the ticket does not exist for the tenant.
pub async fn update_ticket_status(
    db: &Database,
    tenant_id: &str,
    ticket_id: &str,
    status: TicketStatus,
    now_ms: i64,
) -> Result<Option<Ticket>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let ticket_id = ticket_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE tickets SET status = ?1, updated_at = ?2 WHERE tenant_id = ?3 AND id = ?4",
                params![status.to_string(), now_ms, tenant_id, ticket_id],
            )?;
            let ticket = if changed == 0 {
                None
            } else {
                get_by_id_tx(&tx, &tenant_id, &ticket_id)?
            };
            tx.commit()?;
            Ok(ticket)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::contacts::resolve_contact;
    use atende_core::types::ResolveContactInput;
    use tempfile::tempdir;

    async fn setup() -> (Database, tempfile::TempDir, String) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let contact = resolve_contact(
            &db,
            ResolveContactInput {
                tenant_id: "t1".to_string(),
                chat_handle: "5511999999999".to_string(),
                display_name: None,
                phone_hint: None,
            },
            100,
        )
        .await
        .unwrap();
        (db, dir, contact.id)
    }

    fn input(contact_id: &str) -> ResolveTicketInput {
        ResolveTicketInput {
            tenant_id: "t1".to_string(),
            contact_id: contact_id.to_string(),
            channel: "whatsapp".to_string(),
            chat_id: Some("5511999999999@c.us".to_string()),
            instance_id: Some("inst-1".to_string()),
        }
    }

    #[tokio::test]
    async fn creates_open_ticket_and_default_queue() {
        let (db, _dir, contact_id) = setup().await;

        let (ticket, created) = resolve_open_ticket(&db, input(&contact_id), 1_000).await.unwrap();
        assert!(created);
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.channel, "whatsapp");
        assert_eq!(ticket.metadata.chat_id.as_deref(), Some("5511999999999@c.us"));
        assert!(ticket.queue_id.is_some());

        let queue_name: String = db
            .connection()
            .call({
                let queue_id = ticket.queue_id.clone().unwrap();
                move |conn| {
                    let name = conn.query_row(
                        "SELECT name FROM queues WHERE id = ?1",
                        params![queue_id],
                        |row| row.get(0),
                    )?;
                    Ok::<_, rusqlite::Error>(name)
                }
            })
            .await
            .unwrap();
        assert_eq!(queue_name, "whatsapp");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reuses_open_ticket_without_overwriting_chat_id() {
        let (db, _dir, contact_id) = setup().await;

        let (first, _) = resolve_open_ticket(&db, input(&contact_id), 1_000).await.unwrap();

        let mut second_input = input(&contact_id);
        second_input.chat_id = Some("other@c.us".to_string());
        second_input.instance_id = Some("inst-2".to_string());
        let (second, created) = resolve_open_ticket(&db, second_input, 2_000).await.unwrap();

        assert!(!created);
        assert_eq!(first.id, second.id);
        // Existing identifiers are not overwritten by later hints.
        assert_eq!(second.metadata.chat_id.as_deref(), Some("5511999999999@c.us"));
        assert_eq!(second.metadata.instance_id.as_deref(), Some("inst-1"));
        assert_eq!(second.updated_at, 2_000);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_ticket_is_not_reused() {
        let (db, _dir, contact_id) = setup().await;

        let (first, _) = resolve_open_ticket(&db, input(&contact_id), 1_000).await.unwrap();
        update_ticket_status(&db, "t1", &first.id, TicketStatus::Closed, 1_500)
            .await
            .unwrap()
            .unwrap();

        let (second, created) = resolve_open_ticket(&db, input(&contact_id), 2_000).await.unwrap();
        assert!(created);
        assert_ne!(first.id, second.id);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_resolves_yield_single_open_ticket() {
        let (db, _dir, contact_id) = setup().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            let input = input(&contact_id);
            handles.push(tokio::spawn(async move {
                resolve_open_ticket(&db, input, 1_000 + i).await
            }));
        }
        let mut created_count = 0;
        for handle in handles {
            let (_, created) = handle.await.unwrap().unwrap();
            if created {
                created_count += 1;
            }
        }
        assert_eq!(created_count, 1);

        let open_count: i64 = db
            .connection()
            .call({
                let contact_id = contact_id.clone();
                move |conn| {
                    let n = conn.query_row(
                        "SELECT COUNT(*) FROM tickets WHERE tenant_id = 't1' AND contact_id = ?1 \
                         AND status IN ('open', 'pending', 'assigned')",
                        params![contact_id],
                        |row| row.get(0),
                    )?;
                    Ok::<_, rusqlite::Error>(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(open_count, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_ticket_status_update_returns_none() {
        let (db, _dir, _contact_id) = setup().await;
        let missing = update_ticket_status(&db, "t1", "nope", TicketStatus::Closed, 1_000)
            .await
            .unwrap();
        assert!(missing.is_none());
        db.close().await.unwrap();
    }
}
