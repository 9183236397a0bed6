//! Load orchestration: fetch → pivot → synthesize → persist, one table at a time.
//!
//! This module sits "above" [`crate::ingestion`], [`crate::processing`] and
//! [`crate::storage`] and provides:
//!
//! - [`LoadCoordinator`]: runs the pipeline for each table and never lets one table's
//!   failure reach another
//! - [`LoadOutcome`] / [`LoadStatus`]: the per-table result, also appended to the outcome log
//! - observer hooks ([`LoadObserver`]) for logging and alerting
//!
//! Tables run sequentially in the order given. Each load opens its own storage connection
//! and drops it on every exit path. Truncate and insert share one transaction, so a
//! failed load leaves the previous contents of the table in place.

mod observer;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::ingestion::{FetchOutcome, FetchSpec, ResilientFetcher, TabularSource};
use crate::naming::normalize_identifier;
use crate::processing::{PivotOptions, TableDefinition, pivot, table_definition};
use crate::storage::{RESERVED_COLUMNS, StorageConnection, StorageConnector};
use crate::types::{RawRecord, Value, WideTable};

pub use observer::{
    CompositeObserver, FileObserver, LoadContext, LoadObserver, LoadSeverity, LoadStats, TracingObserver,
};

/// Final status of one table load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    /// Rows were written.
    Success,
    /// No partition key produced data, or nothing survived the pivot.
    EmptyData,
    /// Truncate or insert failed; the transaction was rolled back.
    InsertError,
    /// Payload rows or input fields were malformed, or the destination DDL was rejected.
    SchemaError,
    /// Anything else (connection failures, I/O).
    UnexpectedError,
}

impl LoadStatus {
    /// Status recorded for a failed load.
    pub fn for_error(error: &LoadError) -> Self {
        match error {
            LoadError::EmptyResult { .. } => LoadStatus::EmptyData,
            LoadError::SchemaMismatch { .. } | LoadError::Schema { .. } => LoadStatus::SchemaError,
            LoadError::Insert { .. } => LoadStatus::InsertError,
            _ => LoadStatus::UnexpectedError,
        }
    }

    /// Code written to the outcome log.
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Success => "SUCCESS",
            LoadStatus::EmptyData => "EMPTY_DATA",
            LoadStatus::InsertError => "INSERT_ERROR",
            LoadStatus::SchemaError => "SCHEMA_ERROR",
            LoadStatus::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one table load; one row of the outcome log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Source table identifier.
    pub table_id: String,
    /// Normalized destination table name.
    pub destination: String,
    /// Partition key that produced data, if any did.
    pub partition_key: Option<String>,
    /// Rows written (0 unless the load succeeded).
    pub record_count: usize,
    /// Final status.
    pub status: LoadStatus,
    /// Human-readable detail.
    pub message: String,
    /// Fetch attempts made.
    pub attempts: usize,
    /// When the load finished.
    pub extracted_at: NaiveDateTime,
    /// Wall-clock time of the whole load.
    pub elapsed: Duration,
}

impl LoadOutcome {
    /// Returns `true` for [`LoadStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }
}

/// Runs the fetch → pivot → synthesize → persist pipeline per table.
pub struct LoadCoordinator<S, C> {
    fetcher: ResilientFetcher<S>,
    connector: C,
    config: LoaderConfig,
    observer: Option<Arc<dyn LoadObserver>>,
    alert_at_or_above: LoadSeverity,
}

impl<S, C> fmt::Debug for LoadCoordinator<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("config", &self.config)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl<S: TabularSource, C: StorageConnector> LoadCoordinator<S, C> {
    /// Coordinator over a fetcher and a storage connector.
    pub fn new(fetcher: ResilientFetcher<S>, connector: C, config: LoaderConfig) -> Self {
        Self {
            fetcher,
            connector,
            config,
            observer: None,
            alert_at_or_above: LoadSeverity::Critical,
        }
    }

    /// Report every outcome to `observer`; failures at or above `alert_at_or_above` also
    /// trigger `on_alert`.
    pub fn with_observer(mut self, observer: Arc<dyn LoadObserver>, alert_at_or_above: LoadSeverity) -> Self {
        self.observer = Some(observer);
        self.alert_at_or_above = alert_at_or_above;
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Normalized destination table name for `table_id`.
    pub fn destination_table(&self, table_id: &str) -> String {
        normalize_identifier(
            &format!("{}_{table_id}", self.config.table_prefix),
            self.config.max_identifier_length,
        )
    }

    /// Normalized name of the outcome-log table.
    pub fn outcome_table(&self) -> String {
        normalize_identifier(&self.config.outcome_table, self.config.max_identifier_length)
    }

    /// Pivot layout used for every table: the SIDRA default, with surrogate column names reserved.
    pub fn pivot_options(&self) -> PivotOptions {
        PivotOptions {
            max_identifier_length: self.config.max_identifier_length,
            reserved_names: RESERVED_COLUMNS.iter().map(|s| (*s).to_string()).collect(),
            ..PivotOptions::default()
        }
    }

    /// Load every table in `table_ids`, in order. One failure never stops the rest.
    pub fn run_all<T: AsRef<str>>(&self, table_ids: &[T], spec: &FetchSpec) -> Vec<LoadOutcome> {
        let started = Instant::now();
        let outcomes: Vec<LoadOutcome> = table_ids.iter().map(|id| self.run(id.as_ref(), spec)).collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let rows: usize = outcomes.iter().map(|o| o.record_count).sum();
        info!(
            tables = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        outcomes
    }

    /// Load one table. Always returns an outcome; never panics on pipeline failures.
    pub fn run(&self, table_id: &str, spec: &FetchSpec) -> LoadOutcome {
        let started = Instant::now();
        let destination = self.destination_table(table_id);
        info!(table_id, %destination, partition_key = %spec.partition_key, "loading table");

        let fetched = self.fetcher.fetch(table_id, spec);
        let attempts = fetched.attempts().len();
        let (partition_key, result) = match fetched {
            FetchOutcome::Fetched {
                partition_key,
                records,
                ..
            } => (Some(partition_key), self.load(&destination, records)),
            FetchOutcome::Exhausted { .. } => (
                None,
                Err(LoadError::EmptyResult {
                    message: format!("no partition key returned data after {attempts} attempts"),
                }),
            ),
            FetchOutcome::Rejected {
                partition_key, error, ..
            } => (Some(partition_key), Err(error)),
        };

        let ctx = LoadContext {
            table_id: table_id.to_string(),
            destination: destination.clone(),
            partition_key: partition_key.clone(),
        };
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(rows) => {
                self.notify_success(&ctx, LoadStats { rows, attempts, elapsed });
                LoadOutcome {
                    table_id: table_id.to_string(),
                    destination,
                    message: format!(
                        "loaded {rows} rows from partition {}",
                        partition_key.as_deref().unwrap_or("-")
                    ),
                    partition_key,
                    record_count: rows,
                    status: LoadStatus::Success,
                    attempts,
                    extracted_at: Local::now().naive_local(),
                    elapsed,
                }
            }
            Err(e) => {
                self.notify_failure(&ctx, &e);
                LoadOutcome {
                    table_id: table_id.to_string(),
                    destination,
                    partition_key,
                    record_count: 0,
                    status: LoadStatus::for_error(&e),
                    message: e.to_string(),
                    attempts,
                    extracted_at: Local::now().naive_local(),
                    elapsed,
                }
            }
        };

        if let Err(e) = self.record_outcome(&outcome) {
            warn!(table_id, error = %e, "could not write outcome log row");
        }
        outcome
    }

    fn load(&self, destination: &str, records: Vec<RawRecord>) -> LoadResult<usize> {
        let wide = pivot(&records, &self.pivot_options())?;
        drop(records);
        let def = table_definition(destination, &wide);

        let mut conn = self.connector.connect()?;
        let ddl = conn.dialect().create_table_sql(&def);
        debug!(table = %def.name, %ddl, "ensuring destination table");
        conn.execute(&ddl, &[]).map_err(|e| LoadError::Schema {
            table: def.name.clone(),
            message: e.to_string(),
        })?;

        conn.begin()?;
        match replace_rows(&mut conn, &def, &wide, self.config.batch_size) {
            Ok(rows) => {
                conn.commit().map_err(|e| LoadError::Insert {
                    table: def.name.clone(),
                    message: e.to_string(),
                })?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(rb) = conn.rollback() {
                    warn!(table = %def.name, error = %rb, "rollback failed");
                }
                Err(LoadError::Insert {
                    table: def.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn record_outcome(&self, outcome: &LoadOutcome) -> LoadResult<()> {
        let mut conn = self.connector.connect()?;
        let dialect = conn.dialect();
        let table = self.outcome_table();
        conn.execute(&dialect.outcome_table_sql(&table), &[])?;
        conn.execute(
            &dialect.outcome_insert_sql(&table),
            &[
                Value::Utf8(outcome.table_id.clone()),
                outcome
                    .partition_key
                    .clone()
                    .map_or(Value::Null, Value::Utf8),
                Value::Timestamp(outcome.extracted_at),
                Value::Int64(i64::try_from(outcome.record_count).unwrap_or(i64::MAX)),
                Value::Utf8(outcome.status.as_str().to_string()),
                Value::Utf8(outcome.message.clone()),
            ],
        )?;
        Ok(())
    }

    fn notify_success(&self, ctx: &LoadContext, stats: LoadStats) {
        if let Some(obs) = self.observer.as_ref() {
            obs.on_success(ctx, stats);
        }
    }

    fn notify_failure(&self, ctx: &LoadContext, error: &LoadError) {
        let sev = LoadSeverity::for_error(error);
        if let Some(obs) = self.observer.as_ref() {
            obs.on_failure(ctx, sev, error);
            if sev >= self.alert_at_or_above {
                obs.on_alert(ctx, sev, error);
            }
        }
    }
}

/// Truncate `def.name` and insert every row of `wide` in batches of `batch_size`.
fn replace_rows<K: StorageConnection>(
    conn: &mut K,
    def: &TableDefinition,
    wide: &WideTable,
    batch_size: usize,
) -> LoadResult<usize> {
    let dialect = conn.dialect();
    conn.execute(&dialect.truncate_sql(&def.name), &[])?;

    let sql = dialect.insert_sql(&def.name, def.column_names());
    let mut inserted = 0usize;
    let batches = chunk_ranges(wide.row_count(), batch_size.max(1));
    let total = batches.len();
    for (i, range) in batches.into_iter().enumerate() {
        inserted += conn.execute_many(&sql, &wide.rows[range])?;
        debug!(table = %def.name, batch = i + 1, total, inserted, "inserted batch");
    }
    Ok(inserted)
}

fn chunk_ranges(row_count: usize, chunk_size: usize) -> Vec<std::ops::Range<usize>> {
    if row_count == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(row_count.div_ceil(chunk_size));
    let mut start = 0usize;
    while start < row_count {
        let end = (start + chunk_size).min(row_count);
        out.push(start..end);
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ranges_cover_all_rows() {
        assert!(chunk_ranges(0, 100).is_empty());
        assert_eq!(chunk_ranges(250, 100), vec![0..100, 100..200, 200..250]);
        assert_eq!(chunk_ranges(3, 5), vec![0..3]);
    }

    #[test]
    fn status_codes() {
        assert_eq!(LoadStatus::Success.as_str(), "SUCCESS");
        assert_eq!(LoadStatus::EmptyData.to_string(), "EMPTY_DATA");
        let mismatch = LoadError::SchemaMismatch { message: "x".into() };
        assert_eq!(LoadStatus::for_error(&mismatch), LoadStatus::SchemaError);
        let ddl = LoadError::Schema { table: "t".into(), message: "x".into() };
        assert_eq!(LoadStatus::for_error(&ddl), LoadStatus::SchemaError);
        let insert = LoadError::Insert { table: "t".into(), message: "x".into() };
        assert_eq!(LoadStatus::for_error(&insert), LoadStatus::InsertError);
        let io = LoadError::Io(std::io::Error::other("x"));
        assert_eq!(LoadStatus::for_error(&io), LoadStatus::UnexpectedError);
    }
}
