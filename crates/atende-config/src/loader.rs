// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./atende.toml` > `~/.config/atende/atende.toml` >
//! `/etc/atende/atende.toml` with environment variable overrides via the
//! `ATENDE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::AtendeConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/atende/atende.toml` (system-wide)
/// 3. `~/.config/atende/atende.toml` (user XDG config)
/// 4. `./atende.toml` (local directory)
/// 5. `ATENDE_*` environment variables
pub fn load_config() -> Result<AtendeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AtendeConfig::default()))
        .merge(Toml::file("/etc/atende/atende.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("atende/atende.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("atende.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from an inline TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<AtendeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AtendeConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<AtendeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AtendeConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `ATENDE_STORAGE_DATABASE_PATH` must map
/// to `storage.database_path`, not `storage.database.path`.
fn env_provider() -> Env {
    Env::prefixed("ATENDE_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("engine_", "engine.", 1)
            .replacen("storage_", "storage.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn inline_toml_overrides_defaults() {
        let config = load_config_from_str(
            r#"
            [engine]
            log_level = "debug"

            [storage]
            database_path = "/tmp/atende-test.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.log_level, "debug");
        assert_eq!(config.storage.database_path, "/tmp/atende-test.db");
        // Untouched section keeps its default.
        assert_eq!(config.engine.name, "atende");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = load_config_from_str("[storage]\ndatabase_pth = \"x.db\"\n");
        assert!(err.is_err());
    }

    #[test]
    #[serial]
    fn env_vars_override_sections() {
        // set_var is unsafe in edition 2024; the #[serial] guard keeps this
        // from racing other env-reading tests.
        unsafe {
            std::env::set_var("ATENDE_STORAGE_DATABASE_PATH", "/tmp/env-override.db");
        }
        let config = load_config().unwrap();
        unsafe {
            std::env::remove_var("ATENDE_STORAGE_DATABASE_PATH");
        }
        assert_eq!(config.storage.database_path, "/tmp/env-override.db");
    }
}
