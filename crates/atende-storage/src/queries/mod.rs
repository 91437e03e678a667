// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per entity family.
//!
//! Every public operation here takes `&Database`, runs its whole body inside
//! one transaction in one `connection().call()`, and relies on the schema's
//! unique constraints as the ultimate arbiter for concurrent creates: a
//! create that loses a race is caught via [`find_or_create`] and retried as
//! a re-read instead of surfacing to the caller.

pub mod campaigns;
pub mod contacts;
pub mod leads;
pub mod media_jobs;
pub mod messages;
pub mod tickets;

use rusqlite::Transaction;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Fresh string id for a new row.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether `err` is a constraint violation (unique/primary key).
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Create-if-absent with the unique constraint as arbiter.
///
/// Runs `find`; on a miss runs `create`; if the create hits a constraint
/// violation (a concurrent writer got there first) the row is re-read once
/// instead of propagating the conflict.
pub(crate) fn find_or_create<T, F, C>(
    tx: &Transaction<'_>,
    find: F,
    create: C,
) -> rusqlite::Result<T>
where
    F: Fn(&Transaction<'_>) -> rusqlite::Result<Option<T>>,
    C: FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
{
    if let Some(found) = find(tx)? {
        return Ok(found);
    }
    match create(tx) {
        Ok(created) => Ok(created),
        Err(err) if is_unique_violation(&err) => {
            debug!("create lost a uniqueness race, re-reading");
            find(tx)?.ok_or(err)
        }
        Err(err) => Err(err),
    }
}

/// Deserialize a JSON text column, mapping failures to a column conversion
/// error so they surface with the column index.
pub(crate) fn parse_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a TEXT enum column via `FromStr`.
pub(crate) fn parse_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Serialize a value for a JSON text column.
pub(crate) fn to_json<T: Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}
