// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread: `Database` wraps a single [`tokio_rusqlite::Connection`], every
//! query function accepts `&Database` and goes through `connection().call()`,
//! and each multi-row operation runs inside one SQLite transaction in one
//! call. Do NOT create additional `Connection` instances for writes.

use atende_config::model::StorageConfig;
use atende_core::AtendeError;
use tokio_rusqlite::Connection;
use tracing::debug;

/// Handle to the engine's SQLite database.
///
/// Cheap to clone; all clones share the one background writer thread.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` with WAL mode enabled and run
    /// all pending migrations.
    pub async fn open(path: &str) -> Result<Self, AtendeError> {
        let config = StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        };
        Self::open_with(&config).await
    }

    /// Open (or create) the database described by `config` and run all
    /// pending migrations.
    pub async fn open_with(config: &StorageConfig) -> Result<Self, AtendeError> {
        let conn = Connection::open(config.database_path.clone())
            .await
            .map_err(|e| AtendeError::Storage {
                source: Box::new(e),
            })?;

        let wal_mode = config.wal_mode;
        conn.call(move |conn| {
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        let applied = conn
            .call(|conn| Ok(crate::migrations::run_migrations(conn)))
            .await
            .map_err(map_tr_err)?;
        applied?;

        debug!(path = %config.database_path, "database opened");
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection handle.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), AtendeError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(map_tr_err)
    }
}

/// Fold a tokio-rusqlite error into the engine error type.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> AtendeError {
    AtendeError::Storage {
        source: Box::new(e),
    }
}
