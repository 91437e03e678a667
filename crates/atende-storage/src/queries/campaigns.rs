// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign provisioning, lifecycle, and allocation metrics.

use atende_core::AtendeError;
use atende_core::types::{Campaign, CampaignMetrics, CampaignStatus};
use rusqlite::{Row, Transaction, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::{find_or_create, new_id, parse_enum};

const CAMPAIGN_COLUMNS: &str = "id, tenant_id, name, status, instance_id, created_at, updated_at";

fn row_to_campaign(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        status: parse_enum(3, &row.get::<_, String>(3)?)?,
        instance_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn get_by_id_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    campaign_id: &str,
) -> rusqlite::Result<Option<Campaign>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE tenant_id = ?1 AND id = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, campaign_id], row_to_campaign) {
        Ok(campaign) => Ok(Some(campaign)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn get_by_name_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    name: &str,
) -> rusqlite::Result<Option<Campaign>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE tenant_id = ?1 AND name = ?2"
    ))?;
    match stmt.query_row(params![tenant_id, name], row_to_campaign) {
        Ok(campaign) => Ok(Some(campaign)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn insert_campaign_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    name: &str,
    status: CampaignStatus,
    instance_id: Option<&str>,
    now_ms: i64,
) -> rusqlite::Result<Campaign> {
    let id = new_id();
    tx.execute(
        "INSERT INTO campaigns (id, tenant_id, name, status, instance_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, tenant_id, name, status.to_string(), instance_id, now_ms],
    )?;
    get_by_id_tx(tx, tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Find-or-create the per-instance fallback campaign used when leads arrive
/// without an explicit campaign. Created active so allocations are usable
/// immediately.
pub(crate) fn fallback_campaign_tx(
    tx: &Transaction<'_>,
    tenant_id: &str,
    instance_id: Option<&str>,
    now_ms: i64,
) -> rusqlite::Result<Campaign> {
    let instance = instance_id.unwrap_or("default");
    let name = format!("fallback:{instance}");
    find_or_create(
        tx,
        |tx| get_by_name_tx(tx, tenant_id, &name),
        |tx| {
            debug!(tenant_id, name = %name, "provisioning fallback campaign");
            insert_campaign_tx(tx, tenant_id, &name, CampaignStatus::Active, Some(instance), now_ms)
        },
    )
}

/// Create a campaign by name (idempotent: an existing name is returned as-is).
pub async fn create_campaign(
    db: &Database,
    tenant_id: &str,
    name: &str,
    status: CampaignStatus,
    instance_id: Option<&str>,
    now_ms: i64,
) -> Result<Campaign, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let name = name.to_string();
    let instance_id = instance_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let campaign = find_or_create(
                &tx,
                |tx| get_by_name_tx(tx, &tenant_id, &name),
                |tx| insert_campaign_tx(tx, &tenant_id, &name, status, instance_id.as_deref(), now_ms),
            )?;
            tx.commit()?;
            Ok(campaign)
        })
        .await
        .map_err(map_tr_err)
}

/// Get a campaign by id, scoped to a tenant.
pub async fn get_campaign(
    db: &Database,
    tenant_id: &str,
    campaign_id: &str,
) -> Result<Option<Campaign>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let campaign = get_by_id_tx(&tx, &tenant_id, &campaign_id)?;
            tx.commit()?;
            Ok(campaign)
        })
        .await
        .map_err(map_tr_err)
}

/// Transition a campaign's drip lifecycle status. Returns `None` when the
/// campaign does not exist for the tenant.
pub async fn update_campaign_status(
    db: &Database,
    tenant_id: &str,
    campaign_id: &str,
    status: CampaignStatus,
    now_ms: i64,
) -> Result<Option<Campaign>, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 \
                 WHERE tenant_id = ?3 AND id = ?4",
                params![status.to_string(), now_ms, tenant_id, campaign_id],
            )?;
            let campaign = if changed == 0 {
                None
            } else {
                get_by_id_tx(&tx, &tenant_id, &campaign_id)?
            };
            tx.commit()?;
            Ok(campaign)
        })
        .await
        .map_err(map_tr_err)
}

/// Status rollup plus mean response latency for one campaign's allocations.
///
/// The average spans `updated_at - received_at` over non-allocated rows with
/// a non-negative delta (clock skew guard); `None` when no row qualifies.
pub async fn campaign_metrics(
    db: &Database,
    tenant_id: &str,
    campaign_id: &str,
) -> Result<CampaignMetrics, AtendeError> {
    let tenant_id = tenant_id.to_string();
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let metrics = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'allocated'), 0),
                        COALESCE(SUM(status = 'contacted'), 0),
                        COALESCE(SUM(status = 'won'), 0),
                        COALESCE(SUM(status = 'lost'), 0),
                        AVG(CASE WHEN status <> 'allocated' AND updated_at >= received_at
                                 THEN (updated_at - received_at) / 1000.0 END)
                 FROM lead_allocations
                 WHERE tenant_id = ?1 AND campaign_id = ?2",
                params![tenant_id, campaign_id],
                |row| {
                    Ok(CampaignMetrics {
                        total: row.get(0)?,
                        allocated: row.get(1)?,
                        contacted: row.get(2)?,
                        won: row.get(3)?,
                        lost: row.get(4)?,
                        average_response_seconds: row.get(5)?,
                    })
                },
            )?;
            Ok(metrics)
        })
        .await
        .map_err(map_tr_err)
}
