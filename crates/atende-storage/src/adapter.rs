// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`StorageAdapter`] trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use atende_config::model::StorageConfig;
use atende_core::types::{
    AdapterType, AllocationStatus, AllocationSummary, BrokerLeadInput, Campaign, CampaignMetrics,
    CampaignStatus, Contact, HealthStatus, LeadAllocation, MediaJob, MediaJobHints, Message,
    MessageStatus, ResolveContactInput, ResolveTicketInput, Ticket, TicketStatus,
    UpsertMessageInput,
};
use atende_core::{AtendeError, PluginAdapter, StorageAdapter};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all operations to the typed
/// query modules. The database is lazily initialized on the first call to
/// [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until `initialize` is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, AtendeError> {
        self.db.get().ok_or_else(|| AtendeError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, AtendeError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AtendeError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(map_tr_err)?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), AtendeError> {
        let db = Database::open_with(&self.config).await?;
        self.db.set(db).map_err(|_| AtendeError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), AtendeError> {
        let db = self.db()?;
        // Checkpoint WAL; the connection itself is dropped with the adapter.
        db.connection()
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    // --- Contact resolver ---

    async fn resolve_contact(
        &self,
        input: ResolveContactInput,
        now_ms: i64,
    ) -> Result<Contact, AtendeError> {
        queries::contacts::resolve_contact(self.db()?, input, now_ms).await
    }

    async fn get_contact(
        &self,
        tenant_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, AtendeError> {
        queries::contacts::get_contact(self.db()?, tenant_id, contact_id).await
    }

    async fn add_contact_email(
        &self,
        tenant_id: &str,
        contact_id: &str,
        email: &str,
        make_primary: bool,
        now_ms: i64,
    ) -> Result<Option<Contact>, AtendeError> {
        queries::contacts::add_contact_email(self.db()?, tenant_id, contact_id, email, make_primary, now_ms)
            .await
    }

    // --- Ticket resolver ---

    async fn resolve_open_ticket(
        &self,
        input: ResolveTicketInput,
        now_ms: i64,
    ) -> Result<(Ticket, bool), AtendeError> {
        queries::tickets::resolve_open_ticket(self.db()?, input, now_ms).await
    }

    async fn get_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
    ) -> Result<Option<Ticket>, AtendeError> {
        queries::tickets::get_ticket(self.db()?, tenant_id, ticket_id).await
    }

    async fn update_ticket_status(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        status: TicketStatus,
        now_ms: i64,
    ) -> Result<Option<Ticket>, AtendeError> {
        queries::tickets::update_ticket_status(self.db()?, tenant_id, ticket_id, status, now_ms).await
    }

    // --- Message upsert engine ---

    async fn upsert_inbound_message(
        &self,
        input: UpsertMessageInput,
        now_ms: i64,
    ) -> Result<(Message, bool), AtendeError> {
        queries::messages::upsert_inbound_message(self.db()?, input, now_ms).await
    }

    async fn get_message_by_external_id(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, AtendeError> {
        queries::messages::get_message_by_external_id(self.db()?, tenant_id, external_id).await
    }

    async fn list_messages_for_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, AtendeError> {
        queries::messages::list_messages_for_ticket(self.db()?, tenant_id, ticket_id, limit).await
    }

    async fn update_message_status_by_external_id(
        &self,
        tenant_id: &str,
        external_id: &str,
        status: MessageStatus,
        now_ms: i64,
    ) -> Result<Option<Message>, AtendeError> {
        queries::messages::update_message_status_by_external_id(
            self.db()?,
            tenant_id,
            external_id,
            status,
            now_ms,
        )
        .await
    }

    // --- Inbound media job queue ---

    async fn enqueue_media_job(
        &self,
        tenant_id: &str,
        message_id: &str,
        hints: MediaJobHints,
        now_ms: i64,
    ) -> Result<MediaJob, AtendeError> {
        queries::media_jobs::enqueue(self.db()?, tenant_id, message_id, hints, now_ms).await
    }

    async fn claim_next_media_jobs(
        &self,
        limit: i64,
        now_ms: i64,
    ) -> Result<Vec<MediaJob>, AtendeError> {
        queries::media_jobs::claim_next(self.db()?, limit, now_ms).await
    }

    async fn complete_media_job(
        &self,
        job_id: &str,
        now_ms: i64,
    ) -> Result<Option<MediaJob>, AtendeError> {
        queries::media_jobs::complete(self.db()?, job_id, now_ms).await
    }

    async fn reschedule_media_job(
        &self,
        job_id: &str,
        next_retry_at_ms: i64,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<MediaJob>, AtendeError> {
        queries::media_jobs::reschedule(self.db()?, job_id, next_retry_at_ms, error, now_ms).await
    }

    async fn fail_media_job(
        &self,
        job_id: &str,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<MediaJob>, AtendeError> {
        queries::media_jobs::fail(self.db()?, job_id, error, now_ms).await
    }

    // --- Lead allocation deduper ---

    async fn allocate_broker_leads(
        &self,
        tenant_id: &str,
        campaign_id: Option<&str>,
        instance_id: Option<&str>,
        leads: Vec<BrokerLeadInput>,
        now_ms: i64,
    ) -> Result<(Vec<LeadAllocation>, AllocationSummary), AtendeError> {
        queries::leads::allocate_broker_leads(self.db()?, tenant_id, campaign_id, instance_id, leads, now_ms)
            .await
    }

    async fn update_allocation_status(
        &self,
        tenant_id: &str,
        allocation_id: &str,
        status: AllocationStatus,
        notes: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<LeadAllocation>, AtendeError> {
        queries::leads::update_allocation_status(self.db()?, tenant_id, allocation_id, status, notes, now_ms)
            .await
    }

    // --- Campaigns & metrics ---

    async fn create_campaign(
        &self,
        tenant_id: &str,
        name: &str,
        status: CampaignStatus,
        instance_id: Option<&str>,
        now_ms: i64,
    ) -> Result<Campaign, AtendeError> {
        queries::campaigns::create_campaign(self.db()?, tenant_id, name, status, instance_id, now_ms)
            .await
    }

    async fn get_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<Option<Campaign>, AtendeError> {
        queries::campaigns::get_campaign(self.db()?, tenant_id, campaign_id).await
    }

    async fn update_campaign_status(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        status: CampaignStatus,
        now_ms: i64,
    ) -> Result<Option<Campaign>, AtendeError> {
        queries::campaigns::update_campaign_status(self.db()?, tenant_id, campaign_id, status, now_ms)
            .await
    }

    async fn campaign_metrics(
        &self,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<CampaignMetrics, AtendeError> {
        queries::campaigns::campaign_metrics(self.db()?, tenant_id, campaign_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atende_core::ingest::InboundPayload;
    use atende_core::types::{MessageDirection, MessageKind, TicketStatus};
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup_storage() -> (SqliteStorage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(StorageConfig {
            database_path: dir.path().join("adapter.db").display().to_string(),
            wal_mode: true,
        });
        storage.initialize().await.unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let (storage, _dir) = setup_storage().await;
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(StorageConfig {
            database_path: dir.path().join("uninit.db").display().to_string(),
            wal_mode: true,
        });
        let err = storage.get_contact("t1", "c1").await.unwrap_err();
        assert!(matches!(err, AtendeError::Storage { .. }));
    }

    // The end-to-end ingestion scenario: a brand-new chat handle delivers
    // "Hello" with external id ext-1, then the identical event again.
    #[tokio::test]
    async fn inbound_event_scenario_is_idempotent() {
        let (storage, _dir) = setup_storage().await;
        let now = 1_700_000_000_000;

        let contact = storage
            .resolve_contact(
                ResolveContactInput {
                    tenant_id: "t1".to_string(),
                    chat_handle: "5511999999999".to_string(),
                    display_name: None,
                    phone_hint: None,
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(contact.primary_phone.as_deref(), Some("+5511999999999"));

        let (ticket, created) = storage
            .resolve_open_ticket(
                ResolveTicketInput {
                    tenant_id: "t1".to_string(),
                    contact_id: contact.id.clone(),
                    channel: "whatsapp".to_string(),
                    chat_id: Some("5511999999999@c.us".to_string()),
                    instance_id: Some("inst-1".to_string()),
                },
                now,
            )
            .await
            .unwrap();
        assert!(created);
        assert_eq!(ticket.status, TicketStatus::Open);

        let event = UpsertMessageInput {
            tenant_id: "t1".to_string(),
            ticket_id: ticket.id.clone(),
            chat_id: Some("5511999999999@c.us".to_string()),
            direction: MessageDirection::Inbound,
            external_id: Some("ext-1".to_string()),
            idempotency_key: None,
            payload: InboundPayload {
                body: Some("Hello".to_string()),
                timestamp: Some(json!(1_700_000_000)),
                instance_id: Some("inst-1".to_string()),
                ..Default::default()
            },
        };
        let (message, created) = storage.upsert_inbound_message(event.clone(), now).await.unwrap();
        assert!(created);
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.content, "Hello");
        assert_eq!(message.contact_id, contact.id);

        let ticket_after = storage.get_ticket("t1", &ticket.id).await.unwrap().unwrap();
        assert_eq!(ticket_after.last_message_preview.as_deref(), Some("Hello"));

        // Identical redelivery: no new row, preview unchanged.
        let (again, created) = storage.upsert_inbound_message(event, now + 5_000).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, message.id);
        let messages = storage
            .list_messages_for_ticket("t1", &ticket.id, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        let ticket_final = storage.get_ticket("t1", &ticket.id).await.unwrap().unwrap();
        assert_eq!(ticket_final.last_message_preview.as_deref(), Some("Hello"));

        storage.close().await.unwrap();
    }
}
