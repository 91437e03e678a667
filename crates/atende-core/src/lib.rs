// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Atende engagement engine.
//!
//! This crate provides the trait definitions, error types, domain types, and
//! pure reconciliation logic (classification, normalization, timestamp
//! handling) shared across the Atende workspace. The storage adapter crate
//! implements the traits defined here.

pub mod error;
pub mod ingest;
pub mod normalize;
pub mod time;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::AtendeError;
pub use types::{AdapterType, HealthStatus};

pub use traits::{PluginAdapter, StorageAdapter};
