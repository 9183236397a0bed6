//! Remote retrieval with partition-key fallback and bounded retries.
//!
//! [`ResilientFetcher::fetch`] walks the partition keys in priority order (the caller's
//! primary key, then the configured fallbacks) and gives each key a fixed number of
//! attempts. The first well-formed, non-empty payload wins.
//!
//! Per failed attempt `n` (0-based) of a key, before the next attempt of the same key:
//!
//! - HTTP or transport failure: sleep `backoff_base * 2^n`
//! - timeout: sleep `timeout_delay`
//! - empty or header-only payload: no sleep
//!
//! No sleep follows the last attempt of a key. When every key is exhausted the fetcher
//! reports [`FetchOutcome::Exhausted`] after exactly `keys × max_attempts_per_key` attempts.
//!
//! A payload whose rows are not JSON objects, or a source error that
//! [`LoadError::is_retryable`] rejects, ends the fetch at once with
//! [`FetchOutcome::Rejected`].

use std::time::Duration;

use chrono::Local;
use reqwest::Url;
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::types::{RawRecord, RunMetadata};

use super::sidra::decode_payload;

/// Where the long-form rows come from.
///
/// [`HttpSource`] talks to the live API; tests plug in scripted sources.
pub trait TabularSource {
    /// Retrieve the JSON body served at `url`.
    fn fetch_rows(&self, url: &str) -> LoadResult<serde_json::Value>;
}

impl<T: TabularSource + ?Sized> TabularSource for &T {
    fn fetch_rows(&self, url: &str) -> LoadResult<serde_json::Value> {
        (**self).fetch_rows(url)
    }
}

/// Blocking HTTP source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Build a source whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> LoadResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sidra-loader/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl TabularSource for HttpSource {
    fn fetch_rows(&self, url: &str) -> LoadResult<serde_json::Value> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Remote {
                status: status.as_u16(),
            });
        }
        Ok(response.json::<serde_json::Value>()?)
    }
}

/// What to request for one table: variables, period and primary partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    /// Variable selector (`all` or a comma-separated list of codes).
    pub variables: String,
    /// Period selector (`last 3`, `202301-202304`, ...).
    pub period: String,
    /// Primary geographic level (`n1`, `n3`, ...).
    pub partition_key: String,
}

impl Default for FetchSpec {
    fn default() -> Self {
        Self {
            variables: "all".to_string(),
            period: "last 3".to_string(),
            partition_key: "n3".to_string(),
        }
    }
}

/// Build the `/values` URL for one table and partition key.
///
/// Path segments are percent-encoded, so a period of `last 3` is sent as `last%203`.
pub fn sidra_url(
    base_url: &str,
    table_id: &str,
    spec: &FetchSpec,
    partition_key: &str,
) -> LoadResult<String> {
    let mut url = Url::parse(base_url).map_err(|e| LoadError::Config {
        message: format!("invalid base url '{base_url}': {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| LoadError::Config {
            message: format!("base url '{base_url}' cannot carry a path"),
        })?
        .pop_if_empty()
        .extend([
            "values",
            "t",
            table_id,
            "v",
            spec.variables.as_str(),
            "p",
            spec.period.as_str(),
            partition_key,
            "all",
        ]);
    Ok(url.into())
}

/// Priority order of partition keys: `primary` first, then `fallbacks`, without repeats.
pub fn partition_keys(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);
    for key in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        let key = key.trim();
        if !key.is_empty() && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Result of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Well-formed payload with this many observation rows.
    Success(usize),
    /// Empty or header-only payload.
    EmptyResult,
    /// Non-success HTTP status.
    HttpError(u16),
    /// Network failure, timeout, or an undecodable body.
    TransportError {
        /// Error text.
        message: String,
        /// Whether the request hit the timeout.
        timed_out: bool,
    },
    /// Payload rows are structurally invalid, or the source failed in a way retries
    /// cannot fix. Ends the fetch.
    Rejected {
        /// Error text.
        message: String,
    },
}

/// One request made by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    /// Partition key requested.
    pub partition_key: String,
    /// 0-based attempt number within the key.
    pub attempt: u32,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Delay slept after this attempt.
    pub backoff: Duration,
}

/// Final result of [`ResilientFetcher::fetch`].
#[derive(Debug)]
pub enum FetchOutcome {
    /// A partition key produced data.
    Fetched {
        /// Key that produced the rows.
        partition_key: String,
        /// Long-form records stamped with run metadata.
        records: Vec<RawRecord>,
        /// Every attempt made, the successful one last.
        attempts: Vec<FetchAttempt>,
    },
    /// Every key ran out of attempts.
    Exhausted {
        /// Every attempt made.
        attempts: Vec<FetchAttempt>,
    },
    /// A non-retryable failure stopped the fetch; no further keys were tried.
    Rejected {
        /// Key whose response was rejected.
        partition_key: String,
        /// Why the response was rejected.
        error: LoadError,
        /// Every attempt made, the rejected one last.
        attempts: Vec<FetchAttempt>,
    },
}

impl FetchOutcome {
    /// Attempts made, successful or not.
    pub fn attempts(&self) -> &[FetchAttempt] {
        match self {
            FetchOutcome::Fetched { attempts, .. }
            | FetchOutcome::Exhausted { attempts }
            | FetchOutcome::Rejected { attempts, .. } => attempts,
        }
    }
}

/// Retry and fallback settings, usually taken from [`LoaderConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Keys tried after the primary key.
    pub fallback_partitions: Vec<String>,
    /// Attempts per key.
    pub max_attempts_per_key: u32,
    /// Exponential backoff base.
    pub backoff_base: Duration,
    /// Delay after a timeout.
    pub timeout_delay: Duration,
    /// Payload element count (header included) at or below which a payload is empty.
    pub min_payload_rows: usize,
}

impl RetryPolicy {
    /// Policy described by `config`.
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            fallback_partitions: config.fallback_partitions.clone(),
            max_attempts_per_key: config.max_attempts_per_key,
            backoff_base: config.backoff_base(),
            timeout_delay: config.timeout_delay(),
            min_payload_rows: config.min_payload_rows,
        }
    }

    fn delay_after(&self, outcome: &AttemptOutcome, attempt: u32) -> Duration {
        match outcome {
            AttemptOutcome::Success(_) | AttemptOutcome::EmptyResult | AttemptOutcome::Rejected { .. } => {
                Duration::ZERO
            }
            AttemptOutcome::TransportError { timed_out: true, .. } => self.timeout_delay,
            AttemptOutcome::HttpError(_) | AttemptOutcome::TransportError { .. } => self
                .backoff_base
                .saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

/// Fetches one table's long-form rows with retries and partition-key fallback.
pub struct ResilientFetcher<S> {
    source: S,
    base_url: String,
    policy: RetryPolicy,
    sleep: fn(Duration),
}

impl<S: TabularSource> ResilientFetcher<S> {
    /// Fetcher over `source`, building URLs under `base_url`.
    pub fn new(source: S, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            source,
            base_url: base_url.into(),
            policy,
            sleep: std::thread::sleep,
        }
    }

    /// Fetcher configured from a [`LoaderConfig`].
    pub fn from_config(source: S, config: &LoaderConfig) -> Self {
        Self::new(source, config.base_url.clone(), RetryPolicy::from_config(config))
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Fetch `table_id`, trying `spec.partition_key` then the configured fallbacks.
    pub fn fetch(&self, table_id: &str, spec: &FetchSpec) -> FetchOutcome {
        let keys = partition_keys(&spec.partition_key, &self.policy.fallback_partitions);
        self.fetch_with_keys(table_id, spec, &keys)
    }

    /// Fetch `table_id` trying exactly `keys`, in order.
    pub fn fetch_with_keys(&self, table_id: &str, spec: &FetchSpec, keys: &[String]) -> FetchOutcome {
        let mut attempts: Vec<FetchAttempt> = Vec::new();

        for key in keys {
            let url = match sidra_url(&self.base_url, table_id, spec, key) {
                Ok(url) => url,
                Err(e) => {
                    // A bad base url fails every key the same way.
                    warn!(table_id, error = %e, "cannot build request url");
                    return FetchOutcome::Exhausted { attempts };
                }
            };

            for attempt in 0..self.policy.max_attempts_per_key {
                debug!(table_id, partition_key = %key, attempt, %url, "requesting");
                let (outcome, records) = match self.attempt(table_id, key, &url) {
                    Ok(reply) => reply,
                    Err(error) => {
                        warn!(table_id, partition_key = %key, attempt, error = %error, "response rejected");
                        attempts.push(FetchAttempt {
                            partition_key: key.clone(),
                            attempt,
                            outcome: AttemptOutcome::Rejected {
                                message: error.to_string(),
                            },
                            backoff: Duration::ZERO,
                        });
                        return FetchOutcome::Rejected {
                            partition_key: key.clone(),
                            error,
                            attempts,
                        };
                    }
                };

                if let Some(records) = records {
                    info!(
                        table_id,
                        partition_key = %key,
                        rows = records.len(),
                        attempts = attempts.len() + 1,
                        "fetched"
                    );
                    attempts.push(FetchAttempt {
                        partition_key: key.clone(),
                        attempt,
                        outcome,
                        backoff: Duration::ZERO,
                    });
                    return FetchOutcome::Fetched {
                        partition_key: key.clone(),
                        records,
                        attempts,
                    };
                }

                let last = attempt + 1 == self.policy.max_attempts_per_key;
                let backoff = if last {
                    Duration::ZERO
                } else {
                    self.policy.delay_after(&outcome, attempt)
                };
                warn!(
                    table_id,
                    partition_key = %key,
                    attempt,
                    outcome = ?outcome,
                    backoff_ms = backoff.as_millis() as u64,
                    "fetch attempt failed"
                );
                attempts.push(FetchAttempt {
                    partition_key: key.clone(),
                    attempt,
                    outcome,
                    backoff,
                });
                if !backoff.is_zero() {
                    (self.sleep)(backoff);
                }
            }
            info!(table_id, partition_key = %key, "partition key exhausted, falling back");
        }

        warn!(table_id, attempts = attempts.len(), "all partition keys exhausted");
        FetchOutcome::Exhausted { attempts }
    }

    /// One request. `Err` means the response was rejected and the fetch must stop;
    /// retryable failures come back as an [`AttemptOutcome`] without records.
    fn attempt(
        &self,
        table_id: &str,
        key: &str,
        url: &str,
    ) -> LoadResult<(AttemptOutcome, Option<Vec<RawRecord>>)> {
        let body = match self.source.fetch_rows(url) {
            Ok(body) => body,
            Err(LoadError::Remote { status }) => return Ok((AttemptOutcome::HttpError(status), None)),
            Err(e) if e.is_retryable() => {
                let timed_out = matches!(e, LoadError::Timeout { .. });
                return Ok((
                    AttemptOutcome::TransportError {
                        message: e.to_string(),
                        timed_out,
                    },
                    None,
                ));
            }
            Err(e) => return Err(e),
        };

        let Some(elements) = body.as_array().map(Vec::len) else {
            return Ok((
                AttemptOutcome::TransportError {
                    message: "response body is not a json array".to_string(),
                    timed_out: false,
                },
                None,
            ));
        };
        if elements <= self.policy.min_payload_rows {
            return Ok((AttemptOutcome::EmptyResult, None));
        }

        let payload = decode_payload(&body)?;
        if payload.is_empty() {
            return Ok((AttemptOutcome::EmptyResult, None));
        }
        let metadata = RunMetadata {
            table_id: table_id.to_string(),
            extracted_at: Local::now().naive_local(),
            geo_partition: key.to_string(),
        };
        let records = payload.into_records(&metadata);
        Ok((AttemptOutcome::Success(records.len()), Some(records)))
    }
}
