use thiserror::Error;

/// Convenience result type for fetch, pivot and load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error type returned across the load pipeline.
///
/// This is a single error enum shared by the fetcher, the pivot, schema synthesis and the
/// storage layer. Transport-level variants and undecodable bodies are retried inside the
/// fetcher; the structural ones (`SchemaMismatch`, `Schema`, `Insert`) are never retried.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Network failure talking to the remote service (connect, DNS, TLS, body read).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The remote service did not answer within the request timeout.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// The remote service answered with a non-success status code.
    #[error("remote error: http status {status}")]
    Remote { status: u16 },

    /// Well-formed input with no usable rows.
    #[error("empty result: {message}")]
    EmptyResult { message: String },

    /// A required field is absent from the input records or payload.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// The destination DDL was rejected by the storage layer.
    #[error("schema error on table '{table}': {message}")]
    Schema { table: String, message: String },

    /// The bulk load was rejected (and rolled back).
    #[error("insert error on table '{table}': {message}")]
    Insert { table: String, message: String },

    /// Underlying SQLite error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Payload could not be decoded as JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error (config file, event log).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values are out of range.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl LoadError {
    /// Returns `true` for source failures the fetcher retries locally. Anything else ends
    /// the fetch for that table.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadError::Transport { .. }
                | LoadError::Timeout { .. }
                | LoadError::Remote { .. }
                | LoadError::Json(_)
        )
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LoadError::Timeout {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            LoadError::Remote {
                status: status.as_u16(),
            }
        } else {
            LoadError::Transport {
                message: err.to_string(),
            }
        }
    }
}
