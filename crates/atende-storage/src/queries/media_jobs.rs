// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound media job queue: crash-safe, pull-based retry tracking for
//! message media fetch work.
//!
//! At most one job exists per message. Claiming is a compare-and-swap:
//! only rows still `pending` transition to `processing`, so concurrent
//! workers can never double-claim. Transitions out of `processing` are
//! driven by the worker; a stuck `processing` job is an external reaper's
//! problem.

use atende_core::AtendeError;
use atende_core::ingest::truncate_chars;
use atende_core::types::{MediaJob, MediaJobHints};
use rusqlite::{Row, Transaction, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::new_id;

/// Stored error messages are truncated to this many characters.
const MAX_ERROR_CHARS: usize = 1000;

const JOB_COLUMNS: &str = "id, tenant_id, message_id, status, attempts, next_retry_at, \
     last_error, media_url, media_mime_type, created_at, updated_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<MediaJob> {
    Ok(MediaJob {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        message_id: row.get(2)?,
        status: crate::queries::parse_enum(3, &row.get::<_, String>(3)?)?,
        attempts: row.get(4)?,
        next_retry_at: row.get(5)?,
        last_error: row.get(6)?,
        media_url: row.get(7)?,
        media_mime_type: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn by_id_tx(tx: &Transaction<'_>, job_id: &str) -> rusqlite::Result<Option<MediaJob>> {
    let mut stmt = tx.prepare(&format!("SELECT {JOB_COLUMNS} FROM media_jobs WHERE id = ?1"))?;
    match stmt.query_row(params![job_id], row_to_job) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Upsert the media job for a message. Re-enqueue resets the job to pending,
/// clears the previous error and retry schedule, and refreshes the hints.
pub async fn enqueue(
    db: &Database,
    tenant_id: &str,
    message_id: &str,
    hints: MediaJobHints,
    now_ms: i64,
) -> Result<MediaJob, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO media_jobs (id, tenant_id, message_id, status, attempts, \
                 media_url, media_mime_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?6)
                 ON CONFLICT (message_id) DO UPDATE SET
                     status = 'pending',
                     last_error = NULL,
                     next_retry_at = NULL,
                     media_url = excluded.media_url,
                     media_mime_type = excluded.media_mime_type,
                     updated_at = excluded.updated_at",
                params![new_id(), tenant_id, message_id, hints.url, hints.mime_type, now_ms],
            )?;
            let mut stmt = tx.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM media_jobs WHERE message_id = ?1"
            ))?;
            let job = stmt.query_row(params![message_id], row_to_job)?;
            drop(stmt);
            tx.commit()?;
            Ok(job)
        })
        .await
        .map_err(map_tr_err)
}

/// Claim up to `limit` due pending jobs, oldest first.
///
/// Each claimed row atomically moves to `processing` with `attempts + 1`;
/// the `AND status = 'pending'` guard is the compare-and-swap that keeps a
/// job from being claimed twice.
pub async fn claim_next(db: &Database, limit: i64, now_ms: i64) -> Result<Vec<MediaJob>, AtendeError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM media_jobs
                     WHERE status = 'pending'
                       AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                     ORDER BY created_at ASC, id ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now_ms, limit], |row| row.get(0))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                ids
            };

            let mut claimed = Vec::new();
            for id in ids {
                let changed = tx.execute(
                    "UPDATE media_jobs SET status = 'processing', attempts = attempts + 1, \
                     updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
                    params![now_ms, id],
                )?;
                if changed == 1 {
                    if let Some(job) = by_id_tx(&tx, &id)? {
                        claimed.push(job);
                    }
                }
            }
            if !claimed.is_empty() {
                debug!(count = claimed.len(), "media jobs claimed");
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Transition one job out of `processing`. Returns `None` when the job does
/// not exist or is not currently `processing`.
async fn transition(
    db: &Database,
    job_id: &str,
    set_clause: &'static str,
    args: Vec<Box<dyn rusqlite::ToSql + Send>>,
) -> Result<Option<MediaJob>, AtendeError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!(
                "UPDATE media_jobs SET {set_clause} WHERE id = ?1 AND status = 'processing'"
            );
            let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&job_id];
            for arg in &args {
                params_vec.push(arg.as_ref());
            }
            let changed = tx.execute(&sql, params_vec.as_slice())?;
            let job = if changed == 0 {
                None
            } else {
                by_id_tx(&tx, &job_id)?
            };
            tx.commit()?;
            Ok(job)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a processing job as successfully completed.
pub async fn complete(db: &Database, job_id: &str, now_ms: i64) -> Result<Option<MediaJob>, AtendeError> {
    transition(
        db,
        job_id,
        "status = 'completed', updated_at = ?2",
        vec![Box::new(now_ms)],
    )
    .await
}

/// Push a processing job back to pending with a retry-after instant.
pub async fn reschedule(
    db: &Database,
    job_id: &str,
    next_retry_at_ms: i64,
    error: Option<&str>,
    now_ms: i64,
) -> Result<Option<MediaJob>, AtendeError> {
    let error = error.map(|e| truncate_chars(e, MAX_ERROR_CHARS));
    transition(
        db,
        job_id,
        "status = 'pending', next_retry_at = ?2, last_error = ?3, updated_at = ?4",
        vec![Box::new(next_retry_at_ms), Box::new(error), Box::new(now_ms)],
    )
    .await
}

/// Mark a processing job as terminally failed.
pub async fn fail(
    db: &Database,
    job_id: &str,
    error: Option<&str>,
    now_ms: i64,
) -> Result<Option<MediaJob>, AtendeError> {
    let error = error.map(|e| truncate_chars(e, MAX_ERROR_CHARS));
    transition(
        db,
        job_id,
        "status = 'failed', last_error = ?2, updated_at = ?3",
        vec![Box::new(error), Box::new(now_ms)],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::contacts::resolve_contact;
    use crate::queries::messages::upsert_inbound_message;
    use crate::queries::tickets::resolve_open_ticket;
    use atende_core::ingest::{InboundMedia, InboundPayload};
    use atende_core::types::{
        MediaJobStatus, MessageDirection, ResolveContactInput, ResolveTicketInput,
        UpsertMessageInput,
    };
    use tempfile::tempdir;

    async fn setup_with_message(n: usize) -> (Database, tempfile::TempDir, Vec<String>) {
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
                chat_id: None,
                instance_id: None,
            },
            100,
        )
        .await
        .unwrap();

        let mut message_ids = Vec::new();
        for i in 0..n {
            let (message, _) = upsert_inbound_message(
                &db,
                UpsertMessageInput {
                    tenant_id: "t1".to_string(),
                    ticket_id: ticket.id.clone(),
                    chat_id: None,
                    direction: MessageDirection::Inbound,
                    external_id: Some(format!("ext-media-{i}")),
                    idempotency_key: None,
                    payload: InboundPayload {
                        media: Some(InboundMedia {
                            kind: "image".to_string(),
                            url: Some(format!("https://cdn.example/{i}.jpg")),
                            mime_type: Some("image/jpeg".to_string()),
                            ..Default::default()
                        }),
                        timestamp: Some(serde_json::json!(1_000_000 + i as i64)),
                        ..Default::default()
                    },
                },
                2_000_000,
            )
            .await
            .unwrap();
            message_ids.push(message.id);
        }
        (db, dir, message_ids)
    }

    fn hints(url: &str) -> MediaJobHints {
        MediaJobHints {
            url: Some(url.to_string()),
            mime_type: Some("image/jpeg".to_string()),
        }
    }

    #[tokio::test]
    async fn enqueue_claim_complete_lifecycle() {
        let (db, _dir, message_ids) = setup_with_message(1).await;

        let job = enqueue(&db, "t1", &message_ids[0], hints("https://cdn.example/0.jpg"), 1_000)
            .await
            .unwrap();
        assert_eq!(job.status, MediaJobStatus::Pending);
        assert_eq!(job.attempts, 0);

        let claimed = claim_next(&db, 10, 2_000).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, MediaJobStatus::Processing);
        assert_eq!(claimed[0].attempts, 1);

        // Nothing left to claim while processing.
        assert!(claim_next(&db, 10, 3_000).await.unwrap().is_empty());

        let done = complete(&db, &job.id, 4_000).await.unwrap().unwrap();
        assert_eq!(done.status, MediaJobStatus::Completed);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reenqueue_resets_state_and_keeps_one_job_per_message() {
        let (db, _dir, message_ids) = setup_with_message(1).await;

        let job = enqueue(&db, "t1", &message_ids[0], hints("https://a"), 1_000).await.unwrap();
        claim_next(&db, 1, 2_000).await.unwrap();
        reschedule(&db, &job.id, 10_000, Some("timeout"), 2_500).await.unwrap().unwrap();

        let again = enqueue(&db, "t1", &message_ids[0], hints("https://b"), 3_000).await.unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.status, MediaJobStatus::Pending);
        assert_eq!(again.last_error, None);
        assert_eq!(again.next_retry_at, None);
        assert_eq!(again.media_url.as_deref(), Some("https://b"));

        let count: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM media_jobs", [], |row| row.get(0))?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reschedule_defers_until_due() {
        let (db, _dir, message_ids) = setup_with_message(1).await;

        let job = enqueue(&db, "t1", &message_ids[0], hints("https://a"), 1_000).await.unwrap();
        claim_next(&db, 1, 2_000).await.unwrap();
        let back = reschedule(&db, &job.id, 10_000, Some("http 503"), 2_500)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.status, MediaJobStatus::Pending);
        assert_eq!(back.attempts, 1);
        assert_eq!(back.last_error.as_deref(), Some("http 503"));

        // Not due yet.
        assert!(claim_next(&db, 10, 9_999).await.unwrap().is_empty());
        // Due now; attempts keeps counting.
        let reclaimed = claim_next(&db, 10, 10_000).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn fail_truncates_long_errors() {
        let (db, _dir, message_ids) = setup_with_message(1).await;

        let job = enqueue(&db, "t1", &message_ids[0], hints("https://a"), 1_000).await.unwrap();
        claim_next(&db, 1, 2_000).await.unwrap();

        let long_error = "e".repeat(5_000);
        let failed = fail(&db, &job.id, Some(&long_error), 3_000).await.unwrap().unwrap();
        assert_eq!(failed.status, MediaJobStatus::Failed);
        assert_eq!(failed.last_error.map(|e| e.chars().count()), Some(1000));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn transitions_require_processing_state() {
        let (db, _dir, message_ids) = setup_with_message(1).await;

        let job = enqueue(&db, "t1", &message_ids[0], hints("https://a"), 1_000).await.unwrap();
        // Still pending: worker transitions are no-ops.
        assert!(complete(&db, &job.id, 2_000).await.unwrap().is_none());
        assert!(fail(&db, &job.id, None, 2_000).await.unwrap().is_none());
        // Unknown id reports "nothing to do".
        assert!(complete(&db, "nope", 2_000).await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_claims_never_double_claim() {
        let (db, _dir, message_ids) = setup_with_message(1).await;
        enqueue(&db, "t1", &message_ids[0], hints("https://a"), 1_000).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move { claim_next(&db, 1, 2_000).await }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap().unwrap().len();
        }
        assert_eq!(total, 1);

        let attempts: i64 = db
            .connection()
            .call(|conn| {
                let n = conn.query_row("SELECT attempts FROM media_jobs", [], |row| row.get(0))?;
                Ok::<_, rusqlite::Error>(n)
            })
            .await
            .unwrap();
        assert_eq!(attempts, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_bounded() {
        let (db, _dir, message_ids) = setup_with_message(3).await;
        for (i, id) in message_ids.iter().enumerate() {
            enqueue(&db, "t1", id, hints("https://a"), 1_000 + i as i64).await.unwrap();
        }
        let first = claim_next(&db, 2, 5_000).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].created_at <= first[1].created_at);
        let rest = claim_next(&db, 2, 5_000).await.unwrap();
        assert_eq!(rest.len(), 1);

        db.close().await.unwrap();
    }
}
