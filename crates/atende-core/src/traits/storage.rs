// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait: the dependency-injection seam between the
//! reconciliation engine and its external collaborators.
//!
//! The ingestion caller drives `resolve_contact` -> `resolve_open_ticket` ->
//! `upsert_inbound_message` (plus `enqueue_media_job` when the resolved
//! message carries media), the broker feed caller drives
//! `allocate_broker_leads`/`campaign_metrics`, and the media worker drives
//! `claim_next_media_jobs` and the job transitions. All operations take the
//! observation instant as an explicit `now_ms` argument; the engine never
//! reads the clock itself.
//!
//! Lookups scoped to a tenant return `Ok(None)` when the row does not exist
//! for that tenant, so callers can tell "nothing to do" from failure.

use async_trait::async_trait;

use crate::error::AtendeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    AllocationStatus, AllocationSummary, BrokerLeadInput, Campaign, CampaignMetrics,
    CampaignStatus, Contact, LeadAllocation, MediaJob, MediaJobHints, Message, MessageStatus,
    ResolveContactInput, ResolveTicketInput, Ticket, TicketStatus, UpsertMessageInput,
};

/// Adapter for the relational persistence backend.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, pragmas).
    async fn initialize(&self) -> Result<(), AtendeError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), AtendeError>;

    // --- Contact resolver ---

    /// Find-or-create the canonical contact for an external chat identity,
    /// touching `last_interaction_at` either way.
    async fn resolve_contact(
        &self,
        input: ResolveContactInput,
        now_ms: i64,
    ) -> Result<Contact, AtendeError>;

    async fn get_contact(
        &self,
        tenant_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, AtendeError>;

    /// Attach an email sub-record, maintaining the single-primary invariant.
    async fn add_contact_email(
        &self,
        tenant_id: &str,
        contact_id: &str,
        email: &str,
        make_primary: bool,
        now_ms: i64,
    ) -> Result<Option<Contact>, AtendeError>;

    // --- Ticket resolver ---

    /// Reuse the contact's open-family ticket or create a fresh OPEN one,
    /// in a single transaction. The flag reports whether a ticket was created.
    async fn resolve_open_ticket(
        &self,
        input: ResolveTicketInput,
        now_ms: i64,
    ) -> Result<(Ticket, bool), AtendeError>;

    async fn get_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
    ) -> Result<Option<Ticket>, AtendeError>;

    async fn update_ticket_status(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        status: TicketStatus,
        now_ms: i64,
    ) -> Result<Option<Ticket>, AtendeError>;

    // --- Message upsert engine ---

    /// Idempotently record one message event, keyed by the provider external
    /// id when present. The flag reports whether a row was created.
    async fn upsert_inbound_message(
        &self,
        input: UpsertMessageInput,
        now_ms: i64,
    ) -> Result<(Message, bool), AtendeError>;

    async fn get_message_by_external_id(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, AtendeError>;

    async fn list_messages_for_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, AtendeError>;

    /// Provider delivery/read acks for an already-recorded message.
    async fn update_message_status_by_external_id(
        &self,
        tenant_id: &str,
        external_id: &str,
        status: MessageStatus,
        now_ms: i64,
    ) -> Result<Option<Message>, AtendeError>;

    // --- Inbound media job queue ---

    /// Upsert the (single) media job for a message; re-enqueue resets it to
    /// pending and clears the previous error.
    async fn enqueue_media_job(
        &self,
        tenant_id: &str,
        message_id: &str,
        hints: MediaJobHints,
        now_ms: i64,
    ) -> Result<MediaJob, AtendeError>;

    /// Claim up to `limit` due pending jobs, oldest first, atomically moving
    /// them to processing with `attempts + 1`.
    async fn claim_next_media_jobs(
        &self,
        limit: i64,
        now_ms: i64,
    ) -> Result<Vec<MediaJob>, AtendeError>;

    async fn complete_media_job(
        &self,
        job_id: &str,
        now_ms: i64,
    ) -> Result<Option<MediaJob>, AtendeError>;

    async fn reschedule_media_job(
        &self,
        job_id: &str,
        next_retry_at_ms: i64,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<MediaJob>, AtendeError>;

    async fn fail_media_job(
        &self,
        job_id: &str,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<MediaJob>, AtendeError>;

    // --- Lead allocation deduper ---

    /// Ingest one broker feed batch: normalize, dedup against the rolling
    /// window, upsert lead identities, and allocate to the target (or
    /// fallback) campaign. Returns the allocations actually created plus the
    /// campaign-scoped status summary.
    async fn allocate_broker_leads(
        &self,
        tenant_id: &str,
        campaign_id: Option<&str>,
        instance_id: Option<&str>,
        leads: Vec<BrokerLeadInput>,
        now_ms: i64,
    ) -> Result<(Vec<LeadAllocation>, AllocationSummary), AtendeError>;

    async fn update_allocation_status(
        &self,
        tenant_id: &str,
        allocation_id: &str,
        status: AllocationStatus,
        notes: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<LeadAllocation>, AtendeError>;

    // --- Campaigns & metrics ---

    async fn create_campaign(
        &self,
        tenant_id: &str,
        name: &str,
        status: CampaignStatus,
        instance_id: Option<&str>,
        now_ms: i64,
    ) -> Result<Campaign, AtendeError>;

    async fn get_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<Option<Campaign>, AtendeError>;

    async fn update_campaign_status(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        status: CampaignStatus,
        now_ms: i64,
    ) -> Result<Option<Campaign>, AtendeError>;

    async fn campaign_metrics(
        &self,
        tenant_id: &str,
        campaign_id: &str,
    ) -> Result<CampaignMetrics, AtendeError>;
}
