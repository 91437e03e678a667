// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `atende-core::types` for use across
//! adapter trait boundaries. This module re-exports them for convenience
//! within the storage crate.

pub use atende_core::types::{
    AllocationStatus, AllocationSummary, BrokerLead, BrokerLeadInput, Campaign, CampaignMetrics,
    CampaignStatus, Contact, ContactEmail, ContactPhone, LeadAllocation, MediaDescriptor,
    MediaJob, MediaJobHints, MediaJobStatus, Message, MessageDirection, MessageKind,
    MessageStatus, Queue, ResolveContactInput, ResolveTicketInput, Tag, Ticket, TicketMetadata,
    TicketStatus, TimelineBounds, UpsertMessageInput,
};
