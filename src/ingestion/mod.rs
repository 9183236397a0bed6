//! Remote ingestion: SIDRA payload decoding and resilient fetching.
//!
//! Most callers should use [`ResilientFetcher`] (from [`fetch`]) which:
//!
//! - builds `/values` URLs for a table and partition key
//! - retries transient failures with backoff and falls back across partition keys
//! - decodes the winning payload into [`crate::types::RawRecord`]s stamped with run metadata
//!
//! Payload decoding on its own lives in [`sidra`].

pub mod fetch;
pub mod sidra;

pub use fetch::{
    partition_keys, sidra_url, AttemptOutcome, FetchAttempt, FetchOutcome, FetchSpec, HttpSource,
    ResilientFetcher, RetryPolicy, TabularSource,
};
pub use sidra::{decode_payload, parse_payload, SidraPayload};
