// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atende - operator entry point for the engagement reconciliation engine.
//!
//! The engine itself is a library consumed by ingestion and worker
//! processes; this binary covers the operational surface: applying
//! migrations, checking storage health, and reading campaign metrics.

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use atende_core::{AtendeError, PluginAdapter, StorageAdapter};
use atende_storage::{Database, SqliteStorage};

/// Atende - multi-tenant customer-engagement reconciliation engine.
#[derive(Parser, Debug)]
#[command(name = "atende", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the database and apply pending migrations.
    Migrate,
    /// Check storage health.
    Health,
    /// Print allocation metrics for one campaign as JSON.
    Metrics {
        /// Tenant the campaign belongs to.
        #[arg(long)]
        tenant: String,
        /// Campaign id.
        #[arg(long)]
        campaign: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match atende_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            atende_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.engine.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli, config).await {
        eprintln!("atende: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: atende_config::AtendeConfig) -> Result<(), AtendeError> {
    match cli.command {
        Some(Commands::Migrate) => {
            let db = Database::open_with(&config.storage).await?;
            db.close().await?;
            info!(path = %config.storage.database_path, "migrations applied");
            println!("migrations applied to {}", config.storage.database_path);
        }
        Some(Commands::Health) => {
            let storage = SqliteStorage::new(config.storage);
            storage.initialize().await?;
            let status = storage.health_check().await?;
            storage.close().await?;
            println!("storage: {status:?}");
        }
        Some(Commands::Metrics { tenant, campaign }) => {
            let storage = SqliteStorage::new(config.storage);
            storage.initialize().await?;
            let metrics = storage.campaign_metrics(&tenant, &campaign).await?;
            storage.close().await?;
            let rendered = serde_json::to_string_pretty(&metrics)
                .map_err(|e| AtendeError::Internal(e.to_string()))?;
            println!("{rendered}");
        }
        None => {
            println!("atende: use --help for available commands");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atende_config::model::StorageConfig;

    #[test]
    fn binary_loads_config_defaults() {
        let config = atende_config::load_and_validate_str("").expect("default config is valid");
        assert_eq!(config.engine.name, "atende");
    }

    #[tokio::test]
    async fn migrate_then_health_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage_config = StorageConfig {
            database_path: dir.path().join("cli.db").display().to_string(),
            wal_mode: true,
        };

        let db = Database::open_with(&storage_config).await.unwrap();
        db.close().await.unwrap();

        let storage = SqliteStorage::new(storage_config);
        storage.initialize().await.unwrap();
        let status = storage.health_check().await.unwrap();
        assert_eq!(status, atende_core::HealthStatus::Healthy);
        storage.close().await.unwrap();
    }
}
