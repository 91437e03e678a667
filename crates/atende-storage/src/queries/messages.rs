// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message upsert engine: idempotent recording of inbound/outbound events
//! keyed by the provider external id, with payload classification, metadata
//! merging, and ticket aggregate maintenance.
//!
//! Redelivered events update the existing row in place; only a create
//! recomputes the owning ticket's last-message fields and timeline bounds,
//! inside the same transaction.

use atende_core::AtendeError;
use atende_core::ingest::{
    self, ContentClass, InboundPayload, PREVIEW_MAX_CHARS, truncate_chars,
};
use atende_core::normalize::normalize_external_id;
use atende_core::time::parse_event_timestamp;
use atende_core::types::{
    MediaDescriptor, Message, MessageDirection, MessageKind, MessageStatus, Ticket,
    UpsertMessageInput,
};
use rusqlite::{Row, Transaction, params};
use serde_json::{Value, json};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::{is_unique_violation, new_id, parse_enum, parse_json, tickets, to_json};

const MESSAGE_COLUMNS: &str = "id, tenant_id, ticket_id, contact_id, direction, kind, content, \
     caption, media_url, media_mime_type, media_file_name, media_size, status, external_id, \
     instance_id, idempotency_key, metadata, created_at, updated_at";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        ticket_id: row.get(2)?,
        contact_id: row.get(3)?,
        direction: parse_enum(4, &row.get::<_, String>(4)?)?,
        kind: parse_enum(5, &row.get::<_, String>(5)?)?,
        content: row.get(6)?,
        caption: row.get(7)?,
        media: MediaDescriptor {
            url: row.get(8)?,
            mime_type: row.get(9)?,
            file_name: row.get(10)?,
            size_bytes: row.get(11)?,
        },
        status: parse_enum(12, &row.get::<_, String>(12)?)?,
        external_id: row.get(13)?,
        instance_id: row.get(14)?,
        idempotency_key: row.get(15)?,
        metadata: parse_json(16, &row.get::<_, String>(16)?)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn by_external_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    external_id: &str,
) -> rusqlite::Result<Option<Message>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE tenant_id = ?1 AND external_id = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, external_id], row_to_message) {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn by_id_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    message_id: &str,
) -> rusqlite::Result<Option<Message>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE tenant_id = ?1 AND id = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, message_id], row_to_message) {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Everything derived from one inbound event, computed before the
/// transaction starts.
struct EventFields {
    direction: MessageDirection,
    kind: MessageKind,
    content: String,
    caption: Option<String>,
    media: MediaDescriptor,
    instance_id: Option<String>,
    incoming_metadata: serde_json::Map<String, Value>,
    event_ms: i64,
}

/// In-place update for a redelivered external id. Existing metadata keys are
/// preserved unless the incoming event overwrites them; the instance id is
/// refreshed only when the event names one.
fn apply_redelivery(
    tx: &Transaction<'_>,
    existing: &Message,
    ev: &EventFields,
) -> rusqlite::Result<Message> {
    let mut metadata = existing.metadata.clone();
    for (key, value) in &ev.incoming_metadata {
        metadata.insert(key.clone(), value.clone());
    }
    let instance_id = ev
        .instance_id
        .clone()
        .or_else(|| existing.instance_id.clone());
    tx.execute(
        "UPDATE messages SET direction = ?1, kind = ?2, content = ?3, caption = ?4, \
         media_url = ?5, media_mime_type = ?6, media_file_name = ?7, media_size = ?8, \
         instance_id = ?9, metadata = ?10, updated_at = ?11
         WHERE id = ?12",
        params![
            ev.direction.to_string(),
            ev.kind.to_string(),
            ev.content,
            ev.caption,
            ev.media.url,
            ev.media.mime_type,
            ev.media.file_name,
            ev.media.size_bytes,
            instance_id,
            to_json(&metadata)?,
            ev.event_ms,
            existing.id,
        ],
    )?;
    by_id_tx(tx, &existing.tenant_id, &existing.id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Recompute the owning ticket's last-message fields and timeline bounds for
/// a newly created message.
fn update_ticket_aggregates(
    tx: &Transaction<'_>,
    ticket: &Ticket,
    ev: &EventFields,
    now_ms: i64,
) -> rusqlite::Result<()> {
    let mut metadata = ticket.metadata.clone();
    metadata.timeline.observe(ev.direction, ev.event_ms);
    let preview = truncate_chars(&ev.content, PREVIEW_MAX_CHARS);
    tx.execute(
        "UPDATE tickets SET last_message_at = ?1, last_message_preview = ?2, metadata = ?3, \
         updated_at = ?4 WHERE id = ?5",
        params![ev.event_ms, preview, to_json(&metadata)?, now_ms, ticket.id],
    )?;
    Ok(())
}

fn insert_message(
    tx: &Transaction<'_>,
    tenant_id: &str,
    ticket: &Ticket,
    external_id: Option<&str>,
    idempotency_key: Option<&str>,
    status: MessageStatus,
    ev: &EventFields,
) -> rusqlite::Result<Message> {
    let id = new_id();
    tx.execute(
        "INSERT INTO messages (id, tenant_id, ticket_id, contact_id, direction, kind, content, \
         caption, media_url, media_mime_type, media_file_name, media_size, status, external_id, \
         instance_id, idempotency_key, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?18)",
        params![
            id,
            tenant_id,
            ticket.id,
            ticket.contact_id,
            ev.direction.to_string(),
            ev.kind.to_string(),
            ev.content,
            ev.caption,
            ev.media.url,
            ev.media.mime_type,
            ev.media.file_name,
            ev.media.size_bytes,
            status.to_string(),
            external_id,
            ev.instance_id,
            idempotency_key,
            to_json(&ev.incoming_metadata)?,
            ev.event_ms,
        ],
    )?;
    by_id_tx(tx, tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Idempotently record one message event.
///
/// The external id (trimmed) is the dedup key: a known id updates the row in
/// place and reports `false`. Otherwise the message is created against the
/// verified owning ticket (stamping the ticket's own `contact_id` so the
/// pair can never diverge) and the ticket aggregates are refreshed in the
/// same transaction. A missing ticket is a precondition violation and
/// nothing is persisted.
pub async fn upsert_inbound_message(
    db: &Database,
    input: UpsertMessageInput,
    now_ms: i64,
) -> Result<(Message, bool), AtendeError> {
    let UpsertMessageInput {
        tenant_id,
        ticket_id,
        chat_id,
        direction,
        external_id,
        idempotency_key,
        payload,
    } = input;

    let external_id = external_id.as_deref().and_then(normalize_external_id);
    let ev = derive_event_fields(&payload, direction, chat_id.as_deref(), external_id.as_deref(), now_ms);
    // Inbound events have by definition reached us; outbound ones still await
    // the provider ack.
    let status = match direction {
        MessageDirection::Inbound => MessageStatus::Delivered,
        MessageDirection::Outbound => MessageStatus::Pending,
    };

    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            if let Some(eid) = external_id.as_deref() {
                if let Some(existing) = by_external_tx(&tx, &tenant_id, eid)? {
                    debug!(external_id = eid, message_id = %existing.id,
                        "redelivered event, updating in place");
                    let updated = apply_redelivery(&tx, &existing, &ev)?;
                    tx.commit()?;
                    return Ok(Ok((updated, false)));
                }
            }

            let Some(ticket) = tickets::get_by_id_tx(&tx, &tenant_id, &ticket_id)? else {
                return Ok(Err(AtendeError::Precondition(format!(
                    "ticket `{ticket_id}` not found for tenant `{tenant_id}`"
                ))));
            };

            let result = insert_message(
                &tx,
                &tenant_id,
                &ticket,
                external_id.as_deref(),
                idempotency_key.as_deref(),
                status,
                &ev,
            );
            let pair = match result {
                Ok(message) => {
                    update_ticket_aggregates(&tx, &ticket, &ev, now_ms)?;
                    (message, true)
                }
                Err(err) if is_unique_violation(&err) => {
                    // Lost the create race against a concurrent delivery of
                    // the same external id; converge on the winner's row.
                    let Some(eid) = external_id.as_deref() else {
                        return Err(err.into());
                    };
                    let Some(existing) = by_external_tx(&tx, &tenant_id, eid)? else {
                        return Err(err.into());
                    };
                    debug!(external_id = eid, "create lost redelivery race, updating winner");
                    (apply_redelivery(&tx, &existing, &ev)?, false)
                }
                Err(err) => return Err(err.into()),
            };
            tx.commit()?;
            Ok(Ok(pair))
        })
        .await
        .map_err(map_tr_err)?;
    outcome
}

/// Classify the payload and derive every stored field from it.
fn derive_event_fields(
    payload: &InboundPayload,
    direction: MessageDirection,
    chat_id: Option<&str>,
    external_id: Option<&str>,
    now_ms: i64,
) -> EventFields {
    let class = ingest::classify(payload);
    let media_kind = payload.media.as_ref().map(|m| m.kind.clone());
    let kind = ingest::canonical_kind(class, media_kind.as_deref());
    let (content, caption) = ingest::resolve_content(payload, class, kind);
    let event_ms = payload
        .timestamp
        .as_ref()
        .and_then(parse_event_timestamp)
        .unwrap_or(now_ms);
    let media = payload
        .media
        .as_ref()
        .map(|m| MediaDescriptor {
            url: m.url.clone(),
            mime_type: m.mime_type.clone(),
            file_name: m.file_name.clone(),
            size_bytes: m.size_bytes,
        })
        .unwrap_or_default();

    // The normalized sub-object lets consumers reconstruct a
    // provider-agnostic view without re-parsing provider payloads.
    let mut incoming_metadata = payload.extra.clone();
    incoming_metadata.insert(
        "normalized".to_string(),
        json!({
            "direction": direction,
            "kind": kind,
            "unsupported": class == ContentClass::Unknown,
            "content": content,
            "caption": caption,
            "chat_id": chat_id,
            "external_id": external_id,
            "instance_id": payload.instance_id,
            "media": {
                "url": media.url,
                "mime_type": media.mime_type,
                "file_name": media.file_name,
                "size_bytes": media.size_bytes,
            },
            "event_at": event_ms,
        }),
    );

    EventFields {
        direction,
        kind,
        content,
        caption,
        media,
        instance_id: payload.instance_id.clone(),
        incoming_metadata,
        event_ms,
    }
}

/// Get a message by its provider external id, scoped to a tenant.
pub async fn get_message_by_external_id(
    db: &Database,
    tenant_id: &str,
    external_id: &str,
) -> Result<Option<Message>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let Some(external_id) = normalize_external_id(external_id) else {
        return Ok(None);
    };
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let message = by_external_tx(&tx, &tenant_id, &external_id)?;
            tx.commit()?;
            Ok(message)
        })
        .await
        .map_err(map_tr_err)
}

/// Messages of a ticket in chronological order, optionally limited.
pub async fn list_messages_for_ticket(
    db: &Database,
    tenant_id: &str,
    ticket_id: &str,
    limit: Option<i64>,
) -> Result<Vec<Message>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let ticket_id = ticket_id.to_string();
    // SQLite treats LIMIT -1 as unbounded.
    let limit = limit.unwrap_or(-1);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE tenant_id = ?1 AND ticket_id = ?2
                 ORDER BY created_at ASC, id ASC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![tenant_id, ticket_id, limit], row_to_message)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
        .map_err(map_tr_err)
}

/// Provider ack update for a recorded message. Returns `None` when no
/// message carries the external id for the tenant.
pub async fn update_message_status_by_external_id(
    db: &Database,
    tenant_id: &str,
    external_id: &str,
    status: MessageStatus,
    now_ms: i64,
) -> Result<Option<Message>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let Some(external_id) = normalize_external_id(external_id) else {
        return Ok(None);
    };
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 \
                 WHERE tenant_id = ?3 AND external_id = ?4",
                params![status.to_string(), now_ms, tenant_id, external_id],
            )?;
            let message = if changed == 0 {
                None
            } else {
                by_external_tx(&tx, &tenant_id, &external_id)?
            };
            tx.commit()?;
            Ok(message)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::contacts::resolve_contact;
    use crate::queries::tickets::{get_ticket, resolve_open_ticket};
    use atende_core::ingest::InboundMedia;
    use atende_core::types::{ResolveContactInput, ResolveTicketInput};
    use serde_json::json;
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
        let (ticket, _) = resolve_open_ticket(
            &db,
            ResolveTicketInput {
                tenant_id: "t1".to_string(),
                contact_id: contact.id,
                channel: "whatsapp".to_string(),
                chat_id: Some("5511999999999@c.us".to_string()),
                instance_id: Some("inst-1".to_string()),
            },
            100,
        )
        .await
        .unwrap();
        (db, dir, ticket.id)
    }

    fn text_input(ticket_id: &str, external_id: &str, body: &str, ts: Option<i64>) -> UpsertMessageInput {
        UpsertMessageInput {
            tenant_id: "t1".to_string(),
            ticket_id: ticket_id.to_string(),
            chat_id: Some("5511999999999@c.us".to_string()),
            direction: MessageDirection::Inbound,
            external_id: Some(external_id.to_string()),
            idempotency_key: None,
            payload: InboundPayload {
                body: Some(body.to_string()),
                timestamp: ts.map(|t| json!(t)),
                instance_id: Some("inst-1".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn ingestion_is_idempotent_per_external_id() {
        let (db, _dir, ticket_id) = setup().await;

        let (first, created) =
            upsert_inbound_message(&db, text_input(&ticket_id, "ext-1", "Hello", None), 1_000)
                .await
                .unwrap();
        assert!(created);
        assert_eq!(first.kind, MessageKind::Text);
        assert_eq!(first.content, "Hello");

        let (second, created) =
            upsert_inbound_message(&db, text_input(&ticket_id, " ext-1 ", "Hello", None), 2_000)
                .await
                .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let count: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn timeline_bounds_survive_out_of_order_arrival() {
        let (db, _dir, ticket_id) = setup().await;

        let (t1, t2, t3) = (1_000_000, 2_000_000, 3_000_000);
        for (eid, ts) in [("e-a", t3), ("e-b", t1), ("e-c", t2)] {
            upsert_inbound_message(&db, text_input(&ticket_id, eid, "hi", Some(ts)), 5_000_000)
                .await
                .unwrap();
        }

        let ticket = get_ticket(&db, "t1", &ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.metadata.timeline.first_inbound_at, Some(t1));
        assert_eq!(ticket.metadata.timeline.last_inbound_at, Some(t3));
        assert_eq!(ticket.metadata.timeline.first_outbound_at, None);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn media_event_classifies_and_enables_preview_fallback() {
        let (db, _dir, ticket_id) = setup().await;

        let input = UpsertMessageInput {
            tenant_id: "t1".to_string(),
            ticket_id: ticket_id.clone(),
            chat_id: None,
            direction: MessageDirection::Inbound,
            external_id: Some("ext-media".to_string()),
            idempotency_key: None,
            payload: InboundPayload {
                body: None,
                media: Some(InboundMedia {
                    kind: "ptt".to_string(),
                    url: Some("https://cdn.example/audio.ogg".to_string()),
                    mime_type: Some("audio/ogg".to_string()),
                    file_name: None,
                    size_bytes: Some(4_096),
                }),
                ..Default::default()
            },
        };
        let (message, created) = upsert_inbound_message(&db, input, 1_000).await.unwrap();
        assert!(created);
        assert_eq!(message.kind, MessageKind::Audio);
        assert_eq!(message.content, "[audio]");
        assert_eq!(message.media.mime_type.as_deref(), Some("audio/ogg"));

        let ticket = get_ticket(&db, "t1", &ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.last_message_preview.as_deref(), Some("[audio]"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_payload_becomes_unsupported_text() {
        let (db, _dir, ticket_id) = setup().await;

        let input = UpsertMessageInput {
            tenant_id: "t1".to_string(),
            ticket_id: ticket_id.clone(),
            chat_id: None,
            direction: MessageDirection::Inbound,
            external_id: Some("ext-unknown".to_string()),
            idempotency_key: None,
            payload: InboundPayload::default(),
        };
        let (message, _) = upsert_inbound_message(&db, input, 1_000).await.unwrap();
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.content, "[Unsupported message]");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn redelivery_merges_metadata_without_dropping_keys() {
        let (db, _dir, ticket_id) = setup().await;

        let mut first = text_input(&ticket_id, "ext-1", "Hello", Some(1_000_000));
        first.payload.extra.insert("provider_seq".to_string(), json!(1));
        first.payload.extra.insert("route".to_string(), json!("primary"));
        upsert_inbound_message(&db, first, 1_000).await.unwrap();

        let mut second = text_input(&ticket_id, "ext-1", "Hello edited", Some(1_500_000));
        second.payload.extra.insert("provider_seq".to_string(), json!(2));
        let (updated, created) = upsert_inbound_message(&db, second, 2_000).await.unwrap();

        assert!(!created);
        assert_eq!(updated.content, "Hello edited");
        assert_eq!(updated.updated_at, 1_500_000);
        // Overwritten key takes the new value; untouched key survives.
        assert_eq!(updated.metadata.get("provider_seq"), Some(&json!(2)));
        assert_eq!(updated.metadata.get("route"), Some(&json!("primary")));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn long_content_is_truncated_in_preview() {
        let (db, _dir, ticket_id) = setup().await;

        let long = "x".repeat(400);
        upsert_inbound_message(&db, text_input(&ticket_id, "ext-long", &long, None), 1_000)
            .await
            .unwrap();
        let ticket = get_ticket(&db, "t1", &ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.last_message_preview.map(|p| p.chars().count()), Some(280));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn provider_timestamp_formats_are_normalized() {
        let (db, _dir, ticket_id) = setup().await;

        let mut input = text_input(&ticket_id, "ext-iso", "hi", None);
        input.payload.timestamp = Some(json!("2023-11-14T22:13:20Z"));
        let (message, _) = upsert_inbound_message(&db, input, 9_000).await.unwrap();
        assert_eq!(message.created_at, 1_700_000_000_000);

        // Unparseable timestamp falls back to ingestion time.
        let mut input = text_input(&ticket_id, "ext-bad-ts", "hi", None);
        input.payload.timestamp = Some(json!("soon"));
        let (message, _) = upsert_inbound_message(&db, input, 9_000).await.unwrap();
        assert_eq!(message.created_at, 9_000);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_ticket_is_a_precondition_violation() {
        let (db, _dir, _ticket_id) = setup().await;

        let err = upsert_inbound_message(&db, text_input("nope", "ext-x", "hi", None), 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AtendeError::Precondition(_)));

        // Nothing was persisted for the orphan event.
        let count: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE external_id = 'ext-x'",
                    [],
                    |row| row.get(0),
                )?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_deliveries_of_one_external_id_converge() {
        let (db, _dir, ticket_id) = setup().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            let input = text_input(&ticket_id, "ext-race", "Hello", Some(1_000_000));
            handles.push(tokio::spawn(async move {
                upsert_inbound_message(&db, input, 1_000 + i).await
            }));
        }
        let mut creates = 0;
        for handle in handles {
            let (_, created) = handle.await.unwrap().unwrap();
            if created {
                creates += 1;
            }
        }
        assert_eq!(creates, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn ack_updates_status_by_external_id() {
        let (db, _dir, ticket_id) = setup().await;

        upsert_inbound_message(&db, text_input(&ticket_id, "ext-ack", "hi", None), 1_000)
            .await
            .unwrap();
        let updated =
            update_message_status_by_external_id(&db, "t1", "ext-ack", MessageStatus::Read, 2_000)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(updated.status, MessageStatus::Read);

        let missing =
            update_message_status_by_external_id(&db, "t1", "ext-nope", MessageStatus::Read, 2_000)
                .await
                .unwrap();
        assert!(missing.is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn listing_returns_chronological_order() {
        let (db, _dir, ticket_id) = setup().await;

        for (eid, ts) in [("l-1", 3_000_000), ("l-2", 1_000_000), ("l-3", 2_000_000)] {
            upsert_inbound_message(&db, text_input(&ticket_id, eid, "hi", Some(ts)), 5_000_000)
                .await
                .unwrap();
        }
        let messages = list_messages_for_ticket(&db, "t1", &ticket_id, None).await.unwrap();
        let stamps: Vec<i64> = messages.iter().map(|m| m.created_at).collect();
        assert_eq!(stamps, vec![1_000_000, 2_000_000, 3_000_000]);

        let limited = list_messages_for_ticket(&db, "t1", &ticket_id, Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);

        db.close().await.unwrap();
    }
}
