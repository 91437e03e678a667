// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Atende engagement engine.

use thiserror::Error;

/// The primary error type used across all Atende crates and engine operations.
#[derive(Debug, Error)]
pub enum AtendeError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Caller supplied unusable input (no phone digits, unknown campaign id).
    #[error("validation error: {0}")]
    Validation(String),

    /// A required owning entity is missing (e.g. message created against an
    /// absent ticket). Nothing is persisted when this is raised.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
