// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact resolver: find-or-create canonical identities for external chat
//! handles, keyed by `(tenant_id, primary_phone)`.

use atende_core::AtendeError;
use atende_core::normalize::normalize_phone;
use atende_core::types::{Contact, ResolveContactInput};
use rusqlite::{Row, Transaction, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::{find_or_create, new_id, parse_json};

/// Tags stamped onto every resolver-created contact to mark provenance.
const PROVENANCE_TAGS: [&str; 2] = ["channel", "ingested"];

const CONTACT_COLUMNS: &str = "id, tenant_id, display_name, primary_phone, primary_email, \
     custom_fields, metadata, last_interaction_at, created_at, updated_at";

fn row_to_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        display_name: row.get(2)?,
        primary_phone: row.get(3)?,
        primary_email: row.get(4)?,
        custom_fields: parse_json(5, &row.get::<_, String>(5)?)?,
        metadata: parse_json(6, &row.get::<_, String>(6)?)?,
        last_interaction_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn get_by_id_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    contact_id: &str,
) -> rusqlite::Result<Option<Contact>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 AND id = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, contact_id], row_to_contact) {
        Ok(contact) => Ok(Some(contact)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn get_by_phone_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    phone: &str,
) -> rusqlite::Result<Option<Contact>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 AND primary_phone = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, phone], row_to_contact) {
        Ok(contact) => Ok(Some(contact)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Demote any existing primary phone and upsert `phone` as the primary.
fn set_primary_phone(tx: &Transaction<'_>, contact_id: &str, phone: &str) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE contact_phones SET is_primary = 0 WHERE contact_id = ?1",
        params![contact_id],
    )?;
    tx.execute(
        "INSERT INTO contact_phones (id, contact_id, value, kind, is_primary)
         VALUES (?1, ?2, ?3, 'mobile', 1)
         ON CONFLICT (contact_id, value) DO UPDATE SET is_primary = 1",
        params![new_id(), contact_id, phone],
    )?;
    Ok(())
}

/// Find-or-create the tenant tag and link it to the contact.
fn attach_tag(
    tx: &Transaction<'_>,
    tenant_id: &str,
    contact_id: &str,
    name: &str,
) -> rusqlite::Result<()> {
    let tag_id = find_or_create(
        tx,
        |tx| {
            let mut stmt =
                tx.prepare("SELECT id FROM tags WHERE tenant_id = ?1 AND name = ?2")?;
            match stmt.query_row(params![tenant_id, name], |row| row.get::<_, String>(0)) {
                Ok(id) => Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        },
        |tx| {
            let id = new_id();
            tx.execute(
                "INSERT INTO tags (id, tenant_id, name) VALUES (?1, ?2, ?3)",
                params![id, tenant_id, name],
            )?;
            Ok(id)
        },
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO contact_tags (contact_id, tag_id) VALUES (?1, ?2)",
        params![contact_id, tag_id],
    )?;
    Ok(())
}

fn insert_contact(
    tx: &Transaction<'_>,
    tenant_id: &str,
    display_name: &str,
    phone: &str,
    now_ms: i64,
) -> rusqlite::Result<Contact> {
    let id = new_id();
    tx.execute(
        "INSERT INTO contacts (id, tenant_id, display_name, primary_phone, custom_fields, \
         metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, '{}', '{}', ?5, ?5)",
        params![id, tenant_id, display_name, phone, now_ms],
    )?;
    set_primary_phone(tx, &id, phone)?;
    for tag in PROVENANCE_TAGS {
        attach_tag(tx, tenant_id, &id, tag)?;
    }
    debug!(contact_id = %id, phone, "contact created");
    get_by_id_tx(tx, tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Find-or-create the canonical contact for an external chat identity.
///
/// The phone hint wins over the handle when both normalize; a handle with no
/// usable digits is a caller error. `last_interaction_at` is touched whether
/// the contact is new or existing.
pub async fn resolve_contact(
    db: &Database,
    input: ResolveContactInput,
    now_ms: i64,
) -> Result<Contact, AtendeError> {
    let phone = input
        .phone_hint
        .as_deref()
        .and_then(normalize_phone)
        .or_else(|| normalize_phone(&input.chat_handle))
        .ok_or_else(|| {
            AtendeError::Validation(format!(
                "chat handle `{}` has no usable phone identity",
                input.chat_handle
            ))
        })?;
    let display_name = input
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| input.chat_handle.clone());
    let tenant_id = input.tenant_id;

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let contact = find_or_create(
                &tx,
                |tx| get_by_phone_tx(tx, &tenant_id, &phone),
                |tx| insert_contact(tx, &tenant_id, &display_name, &phone, now_ms),
            )?;
            tx.execute(
                "UPDATE contacts SET last_interaction_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now_ms, contact.id],
            )?;
            let touched = get_by_id_tx(&tx, &tenant_id, &contact.id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(touched)
        })
        .await
        .map_err(map_tr_err)
}

/// Get a contact by id, scoped to a tenant.
pub async fn get_contact(
    db: &Database,
    tenant_id: &str,
    contact_id: &str,
) -> Result<Option<Contact>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let contact_id = contact_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let contact = get_by_id_tx(&tx, &tenant_id, &contact_id)?;
            tx.commit()?;
            Ok(contact)
        })
        .await
        .map_err(map_tr_err)
}

/// Attach an email sub-record to a contact, maintaining the invariant that
/// at most one email per contact is primary. Returns `None` when the contact
/// does not exist for the tenant.
pub async fn add_contact_email(
    db: &Database,
    tenant_id: &str,
    contact_id: &str,
    email: &str,
    make_primary: bool,
    now_ms: i64,
) -> Result<Option<Contact>, AtendeError> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(AtendeError::Validation("email must not be empty".into()));
    }
    let tenant_id = tenant_id.to_string();
    let contact_id = contact_id.to_string();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            if get_by_id_tx(&tx, &tenant_id, &contact_id)?.is_none() {
                return Ok(None);
            }
            if make_primary {
                tx.execute(
                    "UPDATE contact_emails SET is_primary = 0 WHERE contact_id = ?1",
                    params![contact_id],
                )?;
            }
            tx.execute(
                "INSERT INTO contact_emails (id, contact_id, value, kind, is_primary)
                 VALUES (?1, ?2, ?3, 'work', ?4)
                 ON CONFLICT (contact_id, value) DO UPDATE SET is_primary = excluded.is_primary",
                params![new_id(), contact_id, email, make_primary],
            )?;
            if make_primary {
                tx.execute(
                    "UPDATE contacts SET primary_email = ?1, updated_at = ?2 WHERE id = ?3",
                    params![email, now_ms, contact_id],
                )?;
            }
            let contact = get_by_id_tx(&tx, &tenant_id, &contact_id)?;
            tx.commit()?;
            Ok(contact)
        })
        .await
        .map_err(map_tr_err)
}
