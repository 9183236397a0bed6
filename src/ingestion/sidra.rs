//! SIDRA `/values` payload decoding.
//!
//! The API answers with a JSON array whose first element is a header row mapping field
//! codes to labels (`{"V": "Valor", "D1N": "Variável", ...}`); every following element
//! is one long-form observation keyed by the same codes:
//!
//! ```json
//! [
//!   {"V": "Valor", "D1N": "Variável", "D2N": "Trimestre", "D3N": "Brasil"},
//!   {"V": "1500", "D1N": "Pessoas ocupadas", "D2N": "1º trimestre 2024", "D3N": "Brasil"}
//! ]
//! ```
//!
//! Cell values are normally strings. Numbers and booleans are kept as their JSON text and
//! `null` becomes an empty string (which the pivot later treats as a missing measurement).

use std::collections::BTreeMap;

use crate::error::{LoadError, LoadResult};
use crate::types::{RawRecord, RunMetadata};

/// A decoded `/values` response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SidraPayload {
    /// Code → label mapping from the header row.
    pub header: BTreeMap<String, String>,
    /// Observation rows, code → text.
    pub rows: Vec<BTreeMap<String, String>>,
}

impl SidraPayload {
    /// Number of observation rows (header excluded).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the payload carries no observation rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Label the header row gives to `code`, if any.
    pub fn label(&self, code: &str) -> Option<&str> {
        self.header.get(code).map(String::as_str)
    }

    /// Turn every observation row into a [`RawRecord`] stamped with `metadata`.
    pub fn into_records(self, metadata: &RunMetadata) -> Vec<RawRecord> {
        self.rows
            .into_iter()
            .map(|dims| RawRecord::new(dims, metadata.clone()))
            .collect()
    }
}

/// Parse a `/values` response body.
pub fn parse_payload(input: &str) -> LoadResult<SidraPayload> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LoadError::SchemaMismatch {
            message: "sidra payload is empty".to_string(),
        });
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    decode_payload(&value)
}

/// Decode an already-parsed `/values` response.
///
/// An empty array yields an empty payload. Anything other than an array of objects is a
/// [`LoadError::SchemaMismatch`].
pub fn decode_payload(value: &serde_json::Value) -> LoadResult<SidraPayload> {
    let items = value.as_array().ok_or_else(|| LoadError::SchemaMismatch {
        message: "sidra payload must be a json array".to_string(),
    })?;

    let mut iter = items.iter().enumerate();
    let header = match iter.next() {
        Some((_, first)) => decode_row(0, first)?,
        None => return Ok(SidraPayload::default()),
    };

    let rows = iter
        .map(|(idx, item)| decode_row(idx, item))
        .collect::<LoadResult<Vec<_>>>()?;

    Ok(SidraPayload { header, rows })
}

fn decode_row(idx: usize, item: &serde_json::Value) -> LoadResult<BTreeMap<String, String>> {
    let obj = item.as_object().ok_or_else(|| LoadError::SchemaMismatch {
        message: format!("payload element {idx} is not a json object"),
    })?;
    Ok(obj
        .iter()
        .map(|(code, v)| (code.clone(), cell_text(v)))
        .collect())
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn header_row_is_split_from_observations() {
        let payload = parse_payload(
            r#"[
                {"V": "Valor", "D1N": "Variável", "D3N": "Brasil"},
                {"V": "1500", "D1N": "Pessoas ocupadas", "D3N": "Brasil"},
                {"V": "...", "D1N": "Taxa", "D3N": "Brasil"}
            ]"#,
        )
        .unwrap();

        assert_eq!(payload.len(), 2);
        assert_eq!(payload.label("D1N"), Some("Variável"));
        assert_eq!(payload.rows[0].get("V").map(String::as_str), Some("1500"));
        assert_eq!(payload.rows[1].get("V").map(String::as_str), Some("..."));
    }

    #[test]
    fn non_string_cells_keep_their_json_text() {
        let payload = decode_payload(&json!([{"V": "Valor"}, {"V": 12.5, "D1N": null, "F": true}]))
            .unwrap();
        let row = &payload.rows[0];
        assert_eq!(row["V"], "12.5");
        assert_eq!(row["D1N"], "");
        assert_eq!(row["F"], "true");
    }

    #[test]
    fn empty_array_and_header_only_have_no_rows() {
        assert!(decode_payload(&json!([])).unwrap().is_empty());
        let header_only = decode_payload(&json!([{"V": "Valor"}])).unwrap();
        assert!(header_only.is_empty());
        assert_eq!(header_only.label("V"), Some("Valor"));
    }

    #[test]
    fn malformed_payloads_are_schema_mismatch() {
        let err = decode_payload(&json!({"V": "1"})).unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));

        let err = decode_payload(&json!([{"V": "Valor"}, ["1", "2"]])).unwrap_err();
        assert!(err.to_string().contains("payload element 1 is not a json object"));

        assert!(matches!(parse_payload("   "), Err(LoadError::SchemaMismatch { .. })));
        assert!(matches!(parse_payload("[{"), Err(LoadError::Json(_))));
    }

    #[test]
    fn records_share_run_metadata() {
        let payload = decode_payload(&json!([{"V": "Valor"}, {"V": "1"}, {"V": "2"}])).unwrap();
        let meta = RunMetadata {
            table_id: "5440".to_string(),
            extracted_at: NaiveDateTime::default(),
            geo_partition: "n1".to_string(),
        };
        let records = payload.into_records(&meta);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.metadata == meta));
        assert_eq!(records[1].text("V"), Some("2"));
    }
}
