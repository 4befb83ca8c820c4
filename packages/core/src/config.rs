//! Sync Configuration
//!
//! Settings shared by the stores, the orchestrator, the subscription relay
//! and the reconciler. Defaults keep data under the centralized
//! `~/.learnspace/` directory:
//!
//! - macOS/Linux: `~/.learnspace/primary.db` and `~/.learnspace/mirror/`
//! - Windows: `%USERPROFILE%\.learnspace\...`

use crate::db::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const PRIMARY_PATH_ENV: &str = "LEARNSPACE_PRIMARY_PATH";
pub const SECONDARY_PATH_ENV: &str = "LEARNSPACE_SECONDARY_PATH";
pub const OPERATION_TIMEOUT_ENV: &str = "LEARNSPACE_OPERATION_TIMEOUT_MS";

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".learnspace")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// libsql database file
    pub primary_path: PathBuf,
    /// SurrealDB RocksDB directory; `None` runs the mirror in memory
    pub secondary_path: Option<PathBuf>,
    /// SurrealDB namespace
    pub namespace: String,
    /// SurrealDB database
    pub database: String,
    /// Per-call store timeout (default: 5000ms)
    pub operation_timeout_ms: u64,
    /// Periodic reconcile tick (default: 30 seconds)
    pub reconcile_interval_secs: u64,
    /// Display name substituted when an enrichment lookup misses
    pub unknown_user_placeholder: String,
    /// Change-event broadcast capacity per store
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            primary_path: dir.join("primary.db"),
            secondary_path: Some(dir.join("mirror")),
            namespace: "learnspace".to_string(),
            database: "mirror".to_string(),
            operation_timeout_ms: 5000,
            reconcile_interval_secs: 30,
            unknown_user_placeholder: "Unknown user".to_string(),
            event_channel_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `LEARNSPACE_*` environment variables
    ///
    /// An unparsable timeout is reported and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(PRIMARY_PATH_ENV) {
            config.primary_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var(SECONDARY_PATH_ENV) {
            config.secondary_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Ok(raw) = std::env::var(OPERATION_TIMEOUT_ENV) {
            match raw.parse() {
                Ok(ms) => config.operation_timeout_ms = ms,
                Err(_) => tracing::warn!(
                    "Ignoring {}={}: not a number of milliseconds",
                    OPERATION_TIMEOUT_ENV,
                    raw
                ),
            }
        }
        config
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            timeout: self.operation_timeout(),
            event_capacity: self.event_channel_capacity,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.primary_path.as_os_str().is_empty() {
            return Err("primary_path cannot be empty".to_string());
        }
        if self.namespace.is_empty() || self.database.is_empty() {
            return Err("namespace and database cannot be empty".to_string());
        }
        if self.operation_timeout_ms == 0 {
            return Err("operation_timeout_ms must be greater than 0".to_string());
        }
        if self.reconcile_interval_secs == 0 {
            return Err("reconcile_interval_secs must be greater than 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.primary_path.ends_with(".learnspace/primary.db"));
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.unknown_user_placeholder, "Unknown user");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = SyncConfig {
            operation_timeout_ms: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            event_channel_capacity: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"operation_timeout_ms": 250, "secondary_path": null}"#).unwrap();
        assert_eq!(config.operation_timeout_ms, 250);
        assert_eq!(config.secondary_path, None);
        assert_eq!(config.reconcile_interval_secs, 30);
        assert_eq!(config.store_options().timeout, Duration::from_millis(250));
    }
}
