// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lead allocation deduper: batch ingestion of broker-sourced leads with a
//! rolling dedup window and idempotent fallback-campaign provisioning.
//!
//! One transaction covers the whole batch. Malformed items (no usable
//! document or phone) are skipped, never fatal to the batch; the 24-hour
//! window is the business-level defense against broker redelivery storms,
//! independent of the storage-level unique constraints.

use atende_core::AtendeError;
use atende_core::normalize::{normalize_document, normalize_phone};
use atende_core::types::{
    AllocationStatus, AllocationSummary, BrokerLead, BrokerLeadInput, LeadAllocation,
};
use rusqlite::{Row, Transaction, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::{campaigns, new_id, parse_json, to_json};

/// Repeated deliveries of a document to the same campaign inside this window
/// are duplicates, not new allocations.
pub const DEDUP_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

const LEAD_COLUMNS: &str = "id, tenant_id, document, full_name, agreement_id, matricula, phone, \
     registrations, tags, margin, net_margin, score, payload, created_at, updated_at";

const ALLOCATION_COLUMNS: &str =
    "id, tenant_id, lead_id, campaign_id, status, notes, payload, received_at, updated_at";

fn row_to_lead(row: &Row<'_>) -> rusqlite::Result<BrokerLead> {
    Ok(BrokerLead {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        document: row.get(2)?,
        full_name: row.get(3)?,
        agreement_id: row.get(4)?,
        matricula: row.get(5)?,
        phone: row.get(6)?,
        registrations: parse_json(7, &row.get::<_, String>(7)?)?,
        tags: parse_json(8, &row.get::<_, String>(8)?)?,
        margin: row.get(9)?,
        net_margin: row.get(10)?,
        score: row.get(11)?,
        payload: row
            .get::<_, Option<String>>(12)?
            .as_deref()
            .map(|raw| parse_json(12, raw))
            .transpose()?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn row_to_allocation(row: &Row<'_>) -> rusqlite::Result<LeadAllocation> {
    Ok(LeadAllocation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        lead_id: row.get(2)?,
        campaign_id: row.get(3)?,
        status: crate::queries::parse_enum(4, &row.get::<_, String>(4)?)?,
        notes: row.get(5)?,
        payload: row
            .get::<_, Option<String>>(6)?
            .as_deref()
            .map(|raw| parse_json(6, raw))
            .transpose()?,
        received_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn lead_by_document_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    document: &str,
) -> rusqlite::Result<Option<BrokerLead>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {LEAD_COLUMNS} FROM broker_leads WHERE tenant_id = ?1 AND document = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, document], row_to_lead) {
        Ok(lead) => Ok(Some(lead)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn allocation_by_id_tx(
    tx: &Transaction<'_>,
    allocation_id: &str,
) -> rusqlite::Result<Option<LeadAllocation>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {ALLOCATION_COLUMNS} FROM lead_allocations WHERE id = ?1"
    ))?;
    match stmt.query_row(params![allocation_id], row_to_allocation) {
        Ok(allocation) => Ok(Some(allocation)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn allocation_for_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    lead_id: &str,
    campaign_id: &str,
) -> rusqlite::Result<Option<LeadAllocation>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {ALLOCATION_COLUMNS} FROM lead_allocations
         WHERE tenant_id = ?1 AND lead_id = ?2 AND campaign_id = ?3"
    ))?;
    match stmt.query_row(params![tenant_id, lead_id, campaign_id], row_to_allocation) {
        Ok(allocation) => Ok(Some(allocation)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether any allocation for this document landed in the campaign inside
/// the dedup window.
fn has_recent_allocation_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    campaign_id: &str,
    document: &str,
    now_ms: i64,
) -> rusqlite::Result<bool> {
    let mut stmt = tx.prepare(
        "SELECT 1 FROM lead_allocations a
         JOIN broker_leads l ON l.id = a.lead_id
         WHERE a.tenant_id = ?1 AND a.campaign_id = ?2 AND l.document = ?3
           AND a.received_at > ?4
         LIMIT 1",
    )?;
    match stmt.query_row(
        params![tenant_id, campaign_id, document, now_ms - DEDUP_WINDOW_MS],
        |_| Ok(()),
    ) {
        Ok(()) => Ok(true),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Order-preserving set union of string lists.
fn union(mut base: Vec<String>, extra: &[String]) -> Vec<String> {
    for item in extra {
        if !base.iter().any(|b| b == item) {
            base.push(item.clone());
        }
    }
    base
}

/// Upsert the lead identity by `(tenant_id, document)`, refreshing the
/// denormalized fields on every delivery. Registrations and tags are
/// unioned; the first matricula is preserved.
fn upsert_lead_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    document: &str,
    phone: &str,
    input: &BrokerLeadInput,
    now_ms: i64,
) -> rusqlite::Result<BrokerLead> {
    let payload_json = input.payload.as_ref().map(to_json).transpose()?;
    match lead_by_document_tx(tx, tenant_id, document)? {
        Some(existing) => {
            let full_name = if input.full_name.trim().is_empty() {
                existing.full_name.clone()
            } else {
                input.full_name.trim().to_string()
            };
            let registrations = union(existing.registrations.clone(), &input.registrations);
            let tags = union(existing.tags.clone(), &input.tags);
            tx.execute(
                "UPDATE broker_leads SET full_name = ?1, phone = ?2, \
                 agreement_id = COALESCE(?3, agreement_id), \
                 matricula = COALESCE(matricula, ?4), \
                 registrations = ?5, tags = ?6, \
                 margin = COALESCE(?7, margin), net_margin = COALESCE(?8, net_margin), \
                 score = COALESCE(?9, score), payload = COALESCE(?10, payload), \
                 updated_at = ?11
                 WHERE id = ?12",
                params![
                    full_name,
                    phone,
                    input.agreement_id,
                    input.matricula,
                    to_json(&registrations)?,
                    to_json(&tags)?,
                    input.margin,
                    input.net_margin,
                    input.score,
                    payload_json,
                    now_ms,
                    existing.id,
                ],
            )?;
            lead_by_document_tx(tx, tenant_id, document)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)
        }
        None => {
            let id = new_id();
            tx.execute(
                "INSERT INTO broker_leads (id, tenant_id, document, full_name, agreement_id, \
                 matricula, phone, registrations, tags, margin, net_margin, score, payload, \
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                params![
                    id,
                    tenant_id,
                    document,
                    input.full_name.trim(),
                    input.agreement_id,
                    input.matricula,
                    phone,
                    to_json(&input.registrations)?,
                    to_json(&input.tags)?,
                    input.margin,
                    input.net_margin,
                    input.score,
                    payload_json,
                    now_ms,
                ],
            )?;
            lead_by_document_tx(tx, tenant_id, document)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)
        }
    }
}

fn summary_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    campaign_id: &str,
) -> rusqlite::Result<AllocationSummary> {
    tx.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'allocated'), 0),
                COALESCE(SUM(status = 'contacted'), 0),
                COALESCE(SUM(status = 'won'), 0),
                COALESCE(SUM(status = 'lost'), 0)
         FROM lead_allocations WHERE tenant_id = ?1 AND campaign_id = ?2",
        params![tenant_id, campaign_id],
        |row| {
            Ok(AllocationSummary {
                total: row.get(0)?,
                allocated: row.get(1)?,
                contacted: row.get(2)?,
                won: row.get(3)?,
                lost: row.get(4)?,
            })
        },
    )
}

/// Ingest one broker feed batch.
///
/// Per item: normalize identifiers (unusable ones skip the item), dedup
/// against the rolling window, refresh the lead identity, and allocate to
/// the resolved campaign. An explicit campaign id must exist for the
/// tenant; without one the per-instance fallback campaign is provisioned
/// idempotently. Returns the allocations created by this call plus the
/// campaign-scoped status summary.
pub async fn allocate_broker_leads(
    db: &Database,
    tenant_id: &str,
    campaign_id: Option<&str>,
    instance_id: Option<&str>,
    leads: Vec<BrokerLeadInput>,
    now_ms: i64,
) -> Result<(Vec<LeadAllocation>, AllocationSummary), AtendeError> {
    let tenant_id = tenant_id.to_string();
    let campaign_id = campaign_id.map(str::to_string);
    let instance_id = instance_id.map(str::to_string);

    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let campaign = match campaign_id.as_deref() {
                Some(id) => match campaigns::get_by_id_tx(&tx, &tenant_id, id)? {
                    Some(campaign) => campaign,
                    None => {
                        return Ok(Err(AtendeError::Validation(format!(
                            "campaign `{id}` not found for tenant `{tenant_id}`"
                        ))));
                    }
                },
                None => campaigns::fallback_campaign_tx(&tx, &tenant_id, instance_id.as_deref(), now_ms)?,
            };

            let mut created = Vec::new();
            let mut skipped = 0usize;
            for lead in &leads {
                let Some(document) = normalize_document(&lead.document) else {
                    debug!(name = %lead.full_name, "skipping lead without usable document");
                    skipped += 1;
                    continue;
                };
                let Some(phone) = normalize_phone(&lead.phone) else {
                    debug!(document = %document, "skipping lead without usable phone");
                    skipped += 1;
                    continue;
                };

                // The identity refreshes on every delivery, duplicate or not.
                let lead_row = upsert_lead_tx(&tx, &tenant_id, &document, &phone, lead, now_ms)?;

                if has_recent_allocation_tx(&tx, &tenant_id, &campaign.id, &document, now_ms)? {
                    debug!(document = %document, campaign_id = %campaign.id,
                        "duplicate delivery inside dedup window, skipping");
                    skipped += 1;
                    continue;
                }

                let payload_json = lead.payload.as_ref().map(to_json).transpose()?;

                match allocation_for_tx(&tx, &tenant_id, &lead_row.id, &campaign.id)? {
                    None => {
                        let id = new_id();
                        tx.execute(
                            "INSERT INTO lead_allocations (id, tenant_id, lead_id, campaign_id, \
                             status, payload, received_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, 'allocated', ?5, ?6, ?6)",
                            params![id, tenant_id, lead_row.id, campaign.id, payload_json, now_ms],
                        )?;
                        if let Some(allocation) = allocation_by_id_tx(&tx, &id)? {
                            created.push(allocation);
                        }
                    }
                    Some(existing) => {
                        // Outside the window the delivery counts as a fresh
                        // allocation; the unique constraint keeps one row, so
                        // the existing one is re-armed.
                        tx.execute(
                            "UPDATE lead_allocations SET status = 'allocated', \
                             payload = COALESCE(?1, payload), received_at = ?2, updated_at = ?2
                             WHERE id = ?3",
                            params![payload_json, now_ms, existing.id],
                        )?;
                        if let Some(allocation) = allocation_by_id_tx(&tx, &existing.id)? {
                            created.push(allocation);
                        }
                    }
                }
            }

            if skipped > 0 {
                debug!(skipped, batch = leads.len(), "lead batch items skipped");
            }
            let summary = summary_tx(&tx, &tenant_id, &campaign.id)?;
            tx.commit()?;
            Ok(Ok((created, summary)))
        })
        .await
        .map_err(map_tr_err)?;
    outcome
}

/// Advance an allocation's lifecycle. Returns `None` when the allocation
/// does not exist for the tenant.
pub async fn update_allocation_status(
    db: &Database,
    tenant_id: &str,
    allocation_id: &str,
    status: AllocationStatus,
    notes: Option<&str>,
    now_ms: i64,
) -> Result<Option<LeadAllocation>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let allocation_id = allocation_id.to_string();
    let notes = notes.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE lead_allocations SET status = ?1, notes = COALESCE(?2, notes), \
                 updated_at = ?3 WHERE tenant_id = ?4 AND id = ?5",
                params![status.to_string(), notes, now_ms, tenant_id, allocation_id],
            )?;
            let allocation = if changed == 0 {
                None
            } else {
                allocation_by_id_tx(&tx, &allocation_id)?
            };
            tx.commit()?;
            Ok(allocation)
        })
        .await
        .map_err(map_tr_err)
}
