//! SQL-safe identifier normalization.
//!
//! Every table and column name handed to the storage layer goes through
//! [`normalize_identifiers`]. A column set is always normalized in one call so that
//! collision suffixes are assigned deterministically across the whole table.
//!
//! Rules, applied per label:
//!
//! - lower-casing, then compatibility decomposition (NFKD) with combining marks removed
//!   (`"Condição"` becomes `"condicao"`, `"İstanbul"` becomes `"istanbul"`)
//! - every character outside `[a-z0-9_]` becomes `_`; runs of `_` collapse to one and
//!   leading/trailing `_` are trimmed
//! - an empty result becomes `col_<index>` (index = position in the batch)
//! - a leading digit gets a `col_` prefix
//! - the result is truncated to the maximum length, dropping a trailing `_`
//!
//! Collisions (with earlier labels or with reserved names) get `_2`, `_3`, ... appended,
//! with the base re-truncated so the suffixed name still fits. When the limit is too short
//! to hold a suffix, the first free name from `a`, `b`, ..., `z`, `aa`, ... is used instead.
//! Every output is at most `max_length` bytes; a `max_length` of 0 is treated as 1.

use std::collections::{HashMap, HashSet};

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Default maximum identifier length (SQL Server's limit).
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 128;

/// Smallest `max_identifier_length` accepted by [`crate::config::LoaderConfig`].
pub const MIN_IDENTIFIER_LENGTH: usize = 16;

/// Normalize an ordered batch of labels into unique identifiers.
///
/// The output has the same length and order as `labels`. `reserved` names are treated as
/// already taken (e.g. surrogate columns added by the storage layer); no output entry will
/// equal one of them.
///
/// ```rust
/// use sidra_loader::naming::normalize_identifiers;
///
/// let out = normalize_identifiers(["Condição de Ocupação", "Condição de Ocupação", ""], 20, &[]);
/// assert_eq!(out[0], "condicao_de_ocupacao");
/// assert_eq!(out[1], "condicao_de_ocupac_2");
/// assert_eq!(out[2], "col_2");
/// ```
pub fn normalize_identifiers<I, S>(labels: I, max_length: usize, reserved: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalizer = NameNormalizer::new(max_length, reserved);
    labels
        .into_iter()
        .map(|label| normalizer.push(label.as_ref()))
        .collect()
}

/// Normalize a single standalone name, e.g. a destination table name.
pub fn normalize_identifier(label: &str, max_length: usize) -> String {
    NameNormalizer::new(max_length, &[]).push(label)
}

/// Batch state for identifier normalization.
///
/// Private on purpose: callers go through [`normalize_identifiers`], so one normalizer
/// always covers one full column set.
struct NameNormalizer {
    max_length: usize,
    position: usize,
    occurrences: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl NameNormalizer {
    fn new(max_length: usize, reserved: &[&str]) -> Self {
        Self {
            max_length: max_length.max(1),
            position: 0,
            occurrences: HashMap::new(),
            taken: reserved.iter().map(|r| (*r).to_string()).collect(),
        }
    }

    fn push(&mut self, label: &str) -> String {
        let index = self.position;
        self.position += 1;

        let base = self.base_name(label, index);
        let count = self.occurrences.entry(base.clone()).or_insert(0);
        *count += 1;

        let mut candidate = base.clone();
        let mut n = *count;
        while self.taken.contains(&candidate) {
            n = n.max(2);
            match with_suffix(&base, n, self.max_length) {
                Some(next) => candidate = next,
                None => {
                    if let Some(spare) = self.spare_name() {
                        candidate = spare;
                    }
                    break;
                }
            }
            n += 1;
        }
        if let Some(count) = self.occurrences.get_mut(&base) {
            *count = (*count).max(n.saturating_sub(1));
        }

        self.taken.insert(candidate.clone());
        candidate
    }

    fn base_name(&self, label: &str, index: usize) -> String {
        let cleaned = clean_label(label);
        let named = if cleaned.is_empty() {
            format!("col_{index}")
        } else if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
            format!("col_{cleaned}")
        } else {
            cleaned
        };
        truncate_identifier(&named, self.max_length)
    }

    /// First free name in `a`..`z`, `aa`.. that fits the limit; `None` once all are taken.
    fn spare_name(&self) -> Option<String> {
        (0usize..)
            .map(letter_name)
            .take_while(|name| name.len() <= self.max_length)
            .find(|name| !self.taken.contains(name))
    }
}

/// Lower-case, strip diacritics, and map everything outside `[a-z0-9_]` to `_`.
fn clean_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_underscore = false;
    for c in label
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| c.to_ascii_lowercase())
    {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

/// Truncate to `max_length` bytes (input is ASCII) and drop a trailing `_`.
fn truncate_identifier(name: &str, max_length: usize) -> String {
    let cut = name.len().min(max_length);
    name[..cut].trim_end_matches('_').to_string()
}

/// `base` cut to fit `_<n>` within `max_length`, or `None` when no stem would remain.
fn with_suffix(base: &str, n: usize, max_length: usize) -> Option<String> {
    let suffix = format!("_{n}");
    let room = max_length.checked_sub(suffix.len())?;
    let stem = truncate_identifier(base, room);
    (!stem.is_empty()).then(|| format!("{stem}{suffix}"))
}

/// Bijective base-26 name: 0 → `a`, 25 → `z`, 26 → `aa`.
fn letter_name(mut k: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(char::from(b'a' + (k % 26) as u8));
        if k < 26 {
            break;
        }
        k = k / 26 - 1;
    }
    letters.iter().rev().collect()
}
