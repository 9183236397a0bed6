//! Loader configuration.
//!
//! [`LoaderConfig::default`] reproduces the production batch settings. A TOML file can
//! override any subset of fields, and a couple of environment variables override the
//! file (see [`LoaderConfig::apply_env`]).
//!
//! ```toml
//! database_path = "/var/lib/sidra/sidra.db"
//! batch_size = 500
//! fallback_partitions = ["n1", "n2"]
//! backoff_base_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LoadError, LoadResult};
use crate::naming::{DEFAULT_MAX_IDENTIFIER_LENGTH, MIN_IDENTIFIER_LENGTH};

/// Environment variable overriding [`LoaderConfig::database_path`].
pub const ENV_DB_PATH: &str = "SIDRA_DB_PATH";
/// Environment variable overriding [`LoaderConfig::base_url`].
pub const ENV_BASE_URL: &str = "SIDRA_BASE_URL";

/// Settings consumed by the fetcher, the pivot and the load coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Root URL of the SIDRA API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Request attempts per partition key before moving to the next key.
    pub max_attempts_per_key: u32,
    /// Backoff base; the delay after failed attempt `n` (0-based) is `base * 2^n`.
    pub backoff_base_ms: u64,
    /// Fixed delay after a timed-out attempt.
    pub timeout_delay_ms: u64,
    /// Partition keys tried, in order, after the caller's primary key.
    pub fallback_partitions: Vec<String>,
    /// Payloads with this many elements or fewer (header row included) count as empty.
    pub min_payload_rows: usize,
    /// Maximum length of generated table and column identifiers.
    pub max_identifier_length: usize,
    /// Rows per INSERT batch.
    pub batch_size: usize,
    /// Destination tables are named `<prefix>_<table id>`.
    pub table_prefix: String,
    /// Table receiving one outcome row per loaded table.
    pub outcome_table: String,
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apisidra.ibge.gov.br".to_string(),
            request_timeout_secs: 60,
            max_attempts_per_key: 3,
            backoff_base_ms: 1_000,
            timeout_delay_ms: 5_000,
            fallback_partitions: vec!["n1".to_string(), "n2".to_string(), "n6".to_string()],
            min_payload_rows: 1,
            max_identifier_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
            batch_size: 100,
            table_prefix: "pnad_pivoted".to_string(),
            outcome_table: "extraction_log".to_string(),
            database_path: PathBuf::from("sidra.db"),
        }
    }
}

impl LoaderConfig {
    /// Parse a configuration from TOML text; missing fields keep their defaults.
    pub fn from_toml_str(input: &str) -> LoadResult<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> LoadResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `SIDRA_DB_PATH` / `SIDRA_BASE_URL` overrides when set and non-empty.
    pub fn apply_env(mut self) -> Self {
        if let Some(path) = std::env::var_os(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> LoadResult<()> {
        let fail = |message: String| Err(LoadError::Config { message });
        if self.batch_size == 0 {
            return fail("batch_size must be > 0".to_string());
        }
        if self.max_attempts_per_key == 0 {
            return fail("max_attempts_per_key must be > 0".to_string());
        }
        if self.max_identifier_length < MIN_IDENTIFIER_LENGTH {
            return fail(format!(
                "max_identifier_length must be >= {MIN_IDENTIFIER_LENGTH} (got {})",
                self.max_identifier_length
            ));
        }
        if self.base_url.trim().is_empty() {
            return fail("base_url must not be empty".to_string());
        }
        if self.table_prefix.trim().is_empty() || self.outcome_table.trim().is_empty() {
            return fail("table_prefix and outcome_table must not be empty".to_string());
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff base as a [`Duration`].
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Post-timeout delay as a [`Duration`].
    pub fn timeout_delay(&self) -> Duration {
        Duration::from_millis(self.timeout_delay_ms)
    }
}
