//! Configuration loading for the tiered record store.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Default config file lives at ~/.config/tiered-store/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TierError;
use crate::retention::RetentionPeriod;

const APP_NAME: &str = "tiered-store";

/// Location and label of one storage tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierSettings {
    /// Name used in logs and error messages
    pub name: String,

    /// Path to the tier's RocksDB directory
    pub path: String,
}

impl TierSettings {
    fn hot() -> Self {
        Self {
            name: "hot".to_string(),
            path: default_data_path("hot"),
        }
    }

    fn cold() -> Self {
        Self {
            name: "cold".to_string(),
            path: default_data_path("cold"),
        }
    }

    /// Path with a leading `~/` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

fn default_hot() -> TierSettings {
    TierSettings::hot()
}

fn default_cold() -> TierSettings {
    TierSettings::cold()
}

/// Change-stream worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiverSettings {
    /// Maximum change events per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between polls of an idle partition
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Partition lease lifetime; renewed every poll
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Pause before redelivering a failed batch
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_lease_ttl_secs() -> u64 {
    30
}

fn default_failure_backoff_ms() -> u64 {
    5000
}

impl Default for ArchiverSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
            failure_backoff_ms: default_failure_backoff_ms(),
        }
    }
}

/// Per-record retry policy for cold-tier writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Give up once this much time has been spent on one record
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    5000
}

fn default_max_elapsed_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

/// Main application settings
///
/// Scalar fields come before nested tables so the struct renders as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the lease/checkpoint store
    #[serde(default = "default_lease_path")]
    pub lease_path: String,

    /// Age after which records migrate to cold
    #[serde(default)]
    pub retention: RetentionPeriod,

    /// Number of change-feed partitions in the hot tier
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Hot tier location
    #[serde(default = "default_hot")]
    pub hot: TierSettings,

    /// Cold tier location
    #[serde(default = "default_cold")]
    pub cold: TierSettings,

    #[serde(default)]
    pub archiver: ArchiverSettings,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_data_path(leaf: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from("./data").join(leaf))
        .to_string_lossy()
        .to_string()
}

fn default_lease_path() -> String {
    default_data_path("leases")
}

fn default_partitions() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hot: TierSettings::hot(),
            cold: TierSettings::cold(),
            lease_path: default_lease_path(),
            retention: RetentionPeriod::default(),
            partitions: default_partitions(),
            archiver: ArchiverSettings::default(),
            retry: RetrySettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/tiered-store/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (TIER__*, `__` between nested keys)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, TierError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("lease_path", default_lease_path())
            .map_err(|e| TierError::Config(e.to_string()))?
            .set_default("retention", RetentionPeriod::default().to_string())
            .map_err(|e| TierError::Config(e.to_string()))?
            .set_default("partitions", i64::from(default_partitions()))
            .map_err(|e| TierError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| TierError::Config(e.to_string()))?;

        // Per-field tier defaults, so a layer may set just `hot.path`
        for tier in [TierSettings::hot(), TierSettings::cold()] {
            builder = builder
                .set_default(format!("{}.name", tier.name), tier.name.clone())
                .map_err(|e| TierError::Config(e.to_string()))?
                .set_default(format!("{}.path", tier.name), tier.path)
                .map_err(|e| TierError::Config(e.to_string()))?;
        }

        builder = builder
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: TIER__HOT__PATH, TIER__RETENTION, TIER__ARCHIVER__BATCH_SIZE
        builder = builder.add_source(
            Environment::with_prefix("TIER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TierError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| TierError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the system misbehave.
    pub fn validate(&self) -> Result<(), TierError> {
        if self.partitions == 0 {
            return Err(TierError::Config("partitions must be > 0".to_string()));
        }
        if self.archiver.batch_size == 0 {
            return Err(TierError::Config(
                "archiver.batch_size must be > 0".to_string(),
            ));
        }
        if self.archiver.lease_ttl_secs == 0 {
            return Err(TierError::Config(
                "archiver.lease_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.hot.expanded_path() == self.cold.expanded_path() {
            return Err(TierError::Config(
                "hot and cold tiers must not share a path".to_string(),
            ));
        }
        Ok(())
    }

    /// Lease store path with `~/` expanded.
    pub fn expanded_lease_path(&self) -> PathBuf {
        expand_home(&self.lease_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
