//! `sidra-loader` fetches long-form statistical tables from the IBGE SIDRA API, pivots them
//! into wide tables, infers a relational schema from the data, and bulk-loads the result.
//!
//! The primary entrypoint is [`execution::LoadCoordinator`], which runs one table at a time:
//!
//! 1. [`ingestion::ResilientFetcher`] requests the table for a primary geographic level and
//!    falls back through other levels (`n1`, `n2`, `n6` by default), retrying each a few
//!    times with backoff
//! 2. [`processing::pivot()`] turns the long-form records into one row per
//!    (period, locality, run) key and one column per variable
//! 3. [`processing::synthesize()`] infers a column type from the values actually present
//! 4. the [`storage`] layer creates the destination table if absent, then truncates and
//!    re-fills it inside one transaction
//!
//! Every table load produces exactly one [`execution::LoadOutcome`], which is reported to an
//! optional [`execution::LoadObserver`] and appended to an outcome-log table.
//!
//! ## Quick example: load into SQLite
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sidra_loader::config::LoaderConfig;
//! use sidra_loader::execution::{LoadCoordinator, LoadSeverity, TracingObserver};
//! use sidra_loader::ingestion::{FetchSpec, HttpSource, ResilientFetcher};
//! use sidra_loader::storage::SqliteConnector;
//!
//! # fn main() -> Result<(), sidra_loader::LoadError> {
//! let config = LoaderConfig::default().apply_env();
//! let source = HttpSource::new(config.request_timeout())?;
//! let fetcher = ResilientFetcher::from_config(source, &config);
//! let connector = SqliteConnector::new(&config.database_path);
//!
//! let coordinator = LoadCoordinator::new(fetcher, connector, config)
//!     .with_observer(Arc::new(TracingObserver), LoadSeverity::Critical);
//! for outcome in coordinator.run_all(&["4093", "5440"], &FetchSpec::default()) {
//!     println!("{} {} rows={}", outcome.table_id, outcome.status, outcome.record_count);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Identifiers
//!
//! Table and column names are never taken verbatim from the source. [`naming`] turns labels
//! such as `"Condição de Ocupação (%)"` into unique, ASCII, length-bounded identifiers:
//!
//! ```rust
//! use sidra_loader::naming::normalize_identifiers;
//!
//! let cols = normalize_identifiers(["Condição de Ocupação (%)", "2023", ""], 128, &["id"]);
//! assert_eq!(cols, vec!["condicao_de_ocupacao", "col_2023", "col_2"]);
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: SIDRA payload decoding and the retrying, falling-back fetcher
//! - [`processing`]: long-to-wide pivot and column type inference
//! - [`naming`]: SQL-safe identifier normalization
//! - [`storage`]: SQL dialects, the connection seam and the SQLite backend
//! - [`execution`]: per-table orchestration, outcomes and observers
//! - [`config`]: loader settings (defaults, TOML, environment)
//! - [`types`]: records, wide tables and typed values
//! - [`error`]: the error type shared by all stages

pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod naming;
pub mod processing;
pub mod storage;
pub mod types;

pub use error::{LoadError, LoadResult};
