use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use tracing::{error, info, warn};

use crate::error::LoadError;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (no data, nothing written).
    Warning,
    /// Error-level event (this table failed).
    Error,
    /// Critical error (storage, I/O, or other infrastructure failures).
    Critical,
}

impl LoadSeverity {
    /// Severity of a failed table load.
    pub fn for_error(error: &LoadError) -> Self {
        match error {
            LoadError::EmptyResult { .. } => LoadSeverity::Warning,
            LoadError::SchemaMismatch { .. }
            | LoadError::Schema { .. }
            | LoadError::Insert { .. }
            | LoadError::Json(_) => LoadSeverity::Error,
            LoadError::Transport { .. } | LoadError::Timeout { .. } | LoadError::Remote { .. } => {
                LoadSeverity::Error
            }
            LoadError::Storage(_)
            | LoadError::Io(_)
            | LoadError::ConfigParse(_)
            | LoadError::Config { .. } => LoadSeverity::Critical,
        }
    }
}

/// Context about one table load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadContext {
    /// Source table identifier.
    pub table_id: String,
    /// Normalized destination table name.
    pub destination: String,
    /// Partition key that produced data, if any did.
    pub partition_key: Option<String>,
}

/// Stats reported on a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    /// Rows written to the destination table.
    pub rows: usize,
    /// Fetch attempts made.
    pub attempts: usize,
    /// Wall-clock time of the whole table load.
    pub elapsed: Duration,
}

/// Observer interface for table load outcomes.
///
/// Exactly one of `on_success` / `on_failure` is called per table load.
pub trait LoadObserver: Send + Sync {
    /// Called when a table was loaded.
    fn on_success(&self, _ctx: &LoadContext, _stats: LoadStats) {}

    /// Called when a table load failed.
    fn on_failure(&self, _ctx: &LoadContext, _severity: LoadSeverity, _error: &LoadError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }

    /// Add another observer.
    pub fn push(&mut self, observer: Arc<dyn LoadObserver>) {
        self.observers.push(observer);
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_success(&self, ctx: &LoadContext, stats: LoadStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits load events as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn on_success(&self, ctx: &LoadContext, stats: LoadStats) {
        info!(
            table_id = %ctx.table_id,
            destination = %ctx.destination,
            partition_key = ctx.partition_key.as_deref().unwrap_or("-"),
            rows = stats.rows,
            attempts = stats.attempts,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "table loaded"
        );
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        match severity {
            LoadSeverity::Info | LoadSeverity::Warning => warn!(
                table_id = %ctx.table_id,
                destination = %ctx.destination,
                ?severity,
                %error,
                "table not loaded"
            ),
            LoadSeverity::Error | LoadSeverity::Critical => error!(
                table_id = %ctx.table_id,
                destination = %ctx.destination,
                ?severity,
                %error,
                "table load failed"
            ),
        }
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        error!(
            table_id = %ctx.table_id,
            destination = %ctx.destination,
            ?severity,
            %error,
            "ALERT: table load failed"
        );
    }
}

/// Appends load events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", Local::now().format("%Y-%m-%dT%H:%M:%S"));
        }
    }
}

impl LoadObserver for FileObserver {
    fn on_success(&self, ctx: &LoadContext, stats: LoadStats) {
        self.append_line(&format!(
            "ok table={} dest={} partition={} rows={} attempts={}",
            ctx.table_id,
            ctx.destination,
            ctx.partition_key.as_deref().unwrap_or("-"),
            stats.rows,
            stats.attempts
        ));
    }

    fn on_failure(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.append_line(&format!(
            "fail severity={severity:?} table={} dest={} err={error}",
            ctx.table_id, ctx.destination
        ));
    }

    fn on_alert(&self, ctx: &LoadContext, severity: LoadSeverity, error: &LoadError) {
        self.append_line(&format!(
            "ALERT severity={severity:?} table={} dest={} err={error}",
            ctx.table_id, ctx.destination
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> LoadContext {
        LoadContext {
            table_id: "4093".to_string(),
            destination: "pnad_pivoted_4093".to_string(),
            partition_key: Some("n3".to_string()),
        }
    }

    #[test]
    fn severities_are_ordered() {
        assert!(LoadSeverity::Info < LoadSeverity::Warning);
        assert!(LoadSeverity::Error < LoadSeverity::Critical);
        let empty = LoadError::EmptyResult { message: "x".into() };
        assert_eq!(LoadSeverity::for_error(&empty), LoadSeverity::Warning);
        let insert = LoadError::Insert { table: "t".into(), message: "x".into() };
        assert_eq!(LoadSeverity::for_error(&insert), LoadSeverity::Error);
        let io = LoadError::Io(std::io::Error::other("disk"));
        assert_eq!(LoadSeverity::for_error(&io), LoadSeverity::Critical);
    }

    #[test]
    fn file_observer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let obs = FileObserver::new(&path);

        obs.on_success(
            &ctx(),
            LoadStats {
                rows: 10,
                attempts: 2,
                elapsed: Duration::from_millis(5),
            },
        );
        let err = LoadError::Insert { table: "t".into(), message: "boom".into() };
        obs.on_alert(&ctx(), LoadSeverity::Critical, &err);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ok table=4093 dest=pnad_pivoted_4093 partition=n3 rows=10"));
        assert!(lines[1].contains("ALERT severity=Critical"));
        assert!(lines[1].contains("boom"));
    }
}
