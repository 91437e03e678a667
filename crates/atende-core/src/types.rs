// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Atende engine.
//!
//! All instants are UTC epoch-milliseconds (`i64`). Externally supplied
//! timestamps are normalized through [`crate::time::parse_event_timestamp`]
//! before they reach any of these types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter in the plugin registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
    Observability,
}

/// Lifecycle status of a ticket. The open family (everything but
/// [`TicketStatus::Closed`]) is mutually exclusive per contact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    Assigned,
    Closed,
}

impl TicketStatus {
    /// Whether this status counts toward the single-open-ticket invariant.
    pub fn is_open_family(self) -> bool {
        !matches!(self, TicketStatus::Closed)
    }
}

/// Direction of a message relative to the tenant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Canonical storage classification of a message payload. Closed set;
/// unrecognized media kinds collapse to [`MessageKind::Document`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

/// Delivery status of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Lifecycle of an inbound media fetch job.
///
/// `pending -> processing` happens on claim; `processing` resolves to
/// `completed`, back to `pending` (reschedule), or `failed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MediaJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Lifecycle of a lead allocation: `allocated -> contacted -> {won | lost}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    Contacted,
    Won,
    Lost,
}

/// Outbound drip lifecycle of a campaign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

/// Canonical identity of a person per tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub tenant_id: String,
    pub display_name: String,
    pub primary_phone: Option<String>,
    pub primary_email: Option<String>,
    pub custom_fields: serde_json::Map<String, Value>,
    pub metadata: serde_json::Map<String, Value>,
    pub last_interaction_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A phone sub-record attached to a contact. At most one per contact has
/// `is_primary` set; the resolver enforces this, not the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPhone {
    pub id: String,
    pub contact_id: String,
    pub value: String,
    pub kind: String,
    pub is_primary: bool,
}

/// An email sub-record attached to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEmail {
    pub id: String,
    pub contact_id: String,
    pub value: String,
    pub kind: String,
    pub is_primary: bool,
}

/// A tenant-scoped tag, attachable to contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
}

/// A routing queue tickets land in, provisioned idempotently per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
}

/// Earliest/latest message instant per direction, maintained monotonically
/// regardless of arrival order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_inbound_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_inbound_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_outbound_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outbound_at: Option<i64>,
}

impl TimelineBounds {
    /// Fold one message instant into the bounds for its direction.
    ///
    /// `first` only moves backward, `last` only moves forward (ties refresh
    /// `last`), so replaying events in any order converges on the same bounds.
    pub fn observe(&mut self, direction: MessageDirection, ts_ms: i64) {
        let (first, last) = match direction {
            MessageDirection::Inbound => (&mut self.first_inbound_at, &mut self.last_inbound_at),
            MessageDirection::Outbound => {
                (&mut self.first_outbound_at, &mut self.last_outbound_at)
            }
        };
        if first.is_none_or(|cur| ts_ms < cur) {
            *first = Some(ts_ms);
        }
        if last.is_none_or(|cur| ts_ms >= cur) {
            *last = Some(ts_ms);
        }
    }
}

/// Typed view of the ticket metadata column. Keys the engine does not model
/// are preserved verbatim in `extra` across read/patch/write cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub timeline: TimelineBounds,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One conversation thread, owned by exactly one contact while open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub tenant_id: String,
    pub contact_id: String,
    pub queue_id: Option<String>,
    pub status: TicketStatus,
    pub channel: String,
    pub tags: Vec<String>,
    pub metadata: TicketMetadata,
    pub last_message_at: Option<i64>,
    pub last_message_preview: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Descriptor of a media attachment carried by a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<i64>,
}

/// One inbound/outbound event inside a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub ticket_id: String,
    pub contact_id: String,
    pub direction: MessageDirection,
    pub kind: MessageKind,
    pub content: String,
    pub caption: Option<String>,
    pub media: MediaDescriptor,
    pub status: MessageStatus,
    /// Provider-assigned id; when present, unique per tenant and used as the
    /// dedup key for redelivered events.
    pub external_id: Option<String>,
    pub instance_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A retry-tracked unit of media fetch/transcode work, at most one live job
/// per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaJob {
    pub id: String,
    pub tenant_id: String,
    pub message_id: String,
    pub status: MediaJobStatus,
    pub attempts: i64,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A named allocation target and outbound drip grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub instance_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A deduplicated broker-sourced lead identity, keyed by digits-only document
/// per tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerLead {
    pub id: String,
    pub tenant_id: String,
    pub document: String,
    pub full_name: String,
    pub agreement_id: Option<String>,
    /// First registration seen for this document; never overwritten.
    pub matricula: Option<String>,
    pub phone: String,
    pub registrations: Vec<String>,
    pub tags: Vec<String>,
    pub margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub score: Option<f64>,
    pub payload: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A (lead, campaign) assignment with a lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadAllocation {
    pub id: String,
    pub tenant_id: String,
    pub lead_id: String,
    pub campaign_id: String,
    pub status: AllocationStatus,
    pub notes: Option<String>,
    pub payload: Option<Value>,
    pub received_at: i64,
    pub updated_at: i64,
}

/// Status counts for the allocations of one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub total: i64,
    pub allocated: i64,
    pub contacted: i64,
    pub won: i64,
    pub lost: i64,
}

/// Allocation rollup plus mean response latency for one campaign.
///
/// `average_response_seconds` is the mean of `updated_at - received_at` over
/// non-allocated rows with a non-negative delta; `None` when no row qualifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub total: i64,
    pub allocated: i64,
    pub contacted: i64,
    pub won: i64,
    pub lost: i64,
    pub average_response_seconds: Option<f64>,
}

/// Input to the contact resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContactInput {
    pub tenant_id: String,
    /// External chat identity (e.g. `5511999999999@c.us`).
    pub chat_handle: String,
    pub display_name: Option<String>,
    /// Preferred over the handle when it normalizes to a usable phone.
    pub phone_hint: Option<String>,
}

/// Input to the ticket resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveTicketInput {
    pub tenant_id: String,
    pub contact_id: String,
    pub channel: String,
    pub chat_id: Option<String>,
    pub instance_id: Option<String>,
}

/// Input to the message upsert engine. The payload is the provider-agnostic
/// envelope built by the ingestion caller; see [`crate::ingest::InboundPayload`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertMessageInput {
    pub tenant_id: String,
    pub ticket_id: String,
    pub chat_id: Option<String>,
    pub direction: MessageDirection,
    pub external_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub payload: crate::ingest::InboundPayload,
}

/// Media descriptor hints handed to the job queue on enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaJobHints {
    pub url: Option<String>,
    pub mime_type: Option<String>,
}

/// One raw lead record from the broker feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerLeadInput {
    pub full_name: String,
    pub document: String,
    pub phone: String,
    pub agreement_id: Option<String>,
    pub matricula: Option<String>,
    pub registrations: Vec<String>,
    pub tags: Vec<String>,
    pub margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub score: Option<f64>,
    pub payload: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_status_open_family() {
        assert!(TicketStatus::Open.is_open_family());
        assert!(TicketStatus::Pending.is_open_family());
        assert!(TicketStatus::Assigned.is_open_family());
        assert!(!TicketStatus::Closed.is_open_family());
    }

    #[test]
    fn status_enums_round_trip_through_strings() {
        use std::str::FromStr;

        for status in [
            TicketStatus::Open,
            TicketStatus::Pending,
            TicketStatus::Assigned,
            TicketStatus::Closed,
        ] {
            assert_eq!(TicketStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert_eq!(MessageKind::Image.to_string(), "image");
        assert_eq!(
            MediaJobStatus::from_str("processing").unwrap(),
            MediaJobStatus::Processing
        );
        assert_eq!(
            AllocationStatus::from_str("contacted").unwrap(),
            AllocationStatus::Contacted
        );
    }

    #[test]
    fn timeline_bounds_converge_regardless_of_arrival_order() {
        let mut a = TimelineBounds::default();
        let mut b = TimelineBounds::default();
        for ts in [30, 10, 20] {
            a.observe(MessageDirection::Inbound, ts);
        }
        for ts in [10, 20, 30] {
            b.observe(MessageDirection::Inbound, ts);
        }
        assert_eq!(a, b);
        assert_eq!(a.first_inbound_at, Some(10));
        assert_eq!(a.last_inbound_at, Some(30));
        assert_eq!(a.first_outbound_at, None);
    }

    #[test]
    fn ticket_metadata_preserves_unknown_keys() {
        let raw = r#"{"chat_id":"123@c.us","provider_ack":3,"timeline":{"first_inbound_at":5}}"#;
        let parsed: TicketMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.chat_id.as_deref(), Some("123@c.us"));
        assert_eq!(parsed.timeline.first_inbound_at, Some(5));
        assert_eq!(parsed.extra.get("provider_ack"), Some(&serde_json::json!(3)));

        let rendered = serde_json::to_string(&parsed).unwrap();
        let reparsed: TicketMetadata = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
