use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default width of one transaction-id range scanned under a single latch.
pub const DEFAULT_SCAN_RANGE_SIZE: u64 = 256;

/// Top-level configuration (falcon_locks.toml).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FalconLockConfig {
    #[serde(default)]
    pub data_locks: DataLockConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Data lock instrumentation section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLockConfig {
    /// Engine name reported in the ENGINE column and offered to `accept_engine`.
    pub engine_name: String,
    /// Width of the transaction-id window scanned per call. Bounds how many
    /// transactions are inspected while both lock-system mutexes are held.
    pub scan_range_size: u64,
    /// Populate the LOCK_DATA column for record locks.
    pub with_lock_data: bool,
}

impl Default for DataLockConfig {
    fn default() -> Self {
        Self {
            engine_name: "FALCON".to_string(),
            scan_range_size: DEFAULT_SCAN_RANGE_SIZE,
            with_lock_data: true,
        }
    }
}

/// Upper bound on each transaction count of `[workload]`. Row slots and pages
/// of the synthetic layout are derived from these counts as `u32`.
pub const MAX_WORKLOAD_TRANSACTIONS: usize = 1_000_000;
/// Upper bound on `[workload] records_per_transaction`.
pub const MAX_WORKLOAD_RECORDS: u32 = 4096;

/// Synthetic workload used by the inspect tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Read-write transactions, each holding an IX table lock plus record locks.
    pub rw_transactions: usize,
    /// Read-only session transactions holding shared record locks.
    pub read_only_transactions: usize,
    /// Record locks taken by each read-write transaction.
    pub records_per_transaction: u32,
    /// Transactions that end up blocked behind an exclusive record lock.
    pub waiters: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            rw_transactions: 300,
            read_only_transactions: 16,
            records_per_transaction: 3,
            waiters: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Prometheus exporter listen address; disabled when empty.
    pub metrics_listen_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,falcon=debug".to_string(),
            metrics_listen_addr: String::new(),
        }
    }
}

impl FalconLockConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: FalconLockConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load a config file, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::or_default(path, Self::load(path))
    }

    /// Resolve the result of [`FalconLockConfig::load`], logging the outcome.
    /// Lets callers read the file before logging is set up.
    pub fn or_default(path: &Path, loaded: Result<Self, ConfigError>) -> Self {
        match loaded {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(ConfigError::Io { .. }) => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_locks.scan_range_size == 0 {
            return Err(ConfigError::Invalid {
                field: "data_locks.scan_range_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.data_locks.engine_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "data_locks.engine_name",
                reason: "must not be empty".into(),
            });
        }
        self.workload.validate()
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, count) in [
            ("workload.rw_transactions", self.rw_transactions),
            ("workload.read_only_transactions", self.read_only_transactions),
        ] {
            if count > MAX_WORKLOAD_TRANSACTIONS {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} exceeds the limit of {}", count, MAX_WORKLOAD_TRANSACTIONS),
                });
            }
        }
        if self.records_per_transaction > MAX_WORKLOAD_RECORDS {
            return Err(ConfigError::Invalid {
                field: "workload.records_per_transaction",
                reason: format!(
                    "{} exceeds the limit of {}",
                    self.records_per_transaction, MAX_WORKLOAD_RECORDS
                ),
            });
        }
        if self.waiters > self.rw_transactions {
            return Err(ConfigError::Invalid {
                field: "workload.waiters",
                reason: format!(
                    "{} waiters need at least as many read-write transactions (have {})",
                    self.waiters, self.rw_transactions
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FalconLockConfig::default();
        assert_eq!(config.data_locks.scan_range_size, 256);
        assert_eq!(config.data_locks.engine_name, "FALCON");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FalconLockConfig::from_toml_str(
            "[data_locks]\nscan_range_size = 16\n",
            "inline",
        )
        .unwrap();
        assert_eq!(config.data_locks.scan_range_size, 16);
        assert!(config.data_locks.with_lock_data);
        assert_eq!(config.workload, WorkloadConfig::default());
    }

    #[test]
    fn test_zero_range_rejected() {
        let err = FalconLockConfig::from_toml_str("[data_locks]\nscan_range_size = 0\n", "inline")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "data_locks.scan_range_size",
                ..
            }
        ));
    }

    #[test]
    fn test_workload_counts_bounded() {
        let err = FalconLockConfig::from_toml_str(
            "[workload]\nread_only_transactions = 1000001\n",
            "inline",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "workload.read_only_transactions",
                ..
            }
        ));
        let at_limit = WorkloadConfig {
            rw_transactions: MAX_WORKLOAD_TRANSACTIONS,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_parse_error_reports_origin() {
        let err = FalconLockConfig::from_toml_str("[data_locks\n", "bad.toml").unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, "bad.toml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[workload]\nrw_transactions = 10\nwaiters = 2").unwrap();
        let config = FalconLockConfig::load(file.path()).unwrap();
        assert_eq!(config.workload.rw_transactions, 10);
        assert_eq!(config.workload.waiters, 2);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = FalconLockConfig::load_or_default(dir.path().join("absent.toml"));
        assert_eq!(config, FalconLockConfig::default());
    }

    #[test]
    fn test_roundtrip_default_toml() {
        let text = toml::to_string_pretty(&FalconLockConfig::default()).unwrap();
        let parsed = FalconLockConfig::from_toml_str(&text, "default").unwrap();
        assert_eq!(parsed, FalconLockConfig::default());
    }
}
