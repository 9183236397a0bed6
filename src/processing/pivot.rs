//! Long-to-wide pivot for [`RawRecord`] batches.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{LoadError, LoadResult};
use crate::naming::{DEFAULT_MAX_IDENTIFIER_LENGTH, normalize_identifiers};
use crate::types::{
    META_EXTRACTED_AT, META_GEO_PARTITION, META_TABLE_ID, RawRecord, Schema, Value, WideTable,
};

/// Options controlling how records are pivoted.
///
/// [`Default`] is the SIDRA layout: one row per (period, locality, run) key, one column per
/// variable (`D1N`), measurement taken from `V`.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotOptions {
    /// Fields forming the entity key, in output column order.
    pub key_dimensions: Vec<String>,
    /// Field whose distinct values become columns.
    pub pivot_dimension: String,
    /// Field holding the measurement (text, coerced to a number).
    pub value_field: String,
    /// Measurement written where a key has no record for a pivot value.
    pub fill_value: Value,
    /// Maximum length of generated column names.
    pub max_identifier_length: usize,
    /// Names generated columns must not take (e.g. surrogate storage columns).
    pub reserved_names: Vec<String>,
}

impl Default for PivotOptions {
    fn default() -> Self {
        Self {
            key_dimensions: vec![
                "D2N".to_string(),
                "D3N".to_string(),
                META_TABLE_ID.to_string(),
                META_EXTRACTED_AT.to_string(),
                META_GEO_PARTITION.to_string(),
            ],
            pivot_dimension: "D1N".to_string(),
            value_field: "V".to_string(),
            fill_value: Value::Int64(0),
            max_identifier_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
            reserved_names: Vec::new(),
        }
    }
}

/// Pivot long-form records into a [`WideTable`].
///
/// - Every record must carry the value field, the pivot dimension and all key dimensions;
///   otherwise [`LoadError::SchemaMismatch`] is returned.
/// - Measurements that are not numeric (empty, `-`, `...`, `X`, free text) drop their record.
/// - If nothing survives coercion, [`LoadError::EmptyResult`] is returned.
/// - For a repeated (key, pivot value) pair the first record in input order wins; later
///   duplicates are discarded, never summed or averaged. Pivoting the same input again
///   yields the same table.
/// - Cells with no source record hold `options.fill_value`.
/// - Rows follow first-seen key order; value columns follow first-seen pivot order. Column
///   names (keys first, then pivot values) are normalized in one batch.
///
/// ```rust
/// use std::collections::BTreeMap;
///
/// use chrono::NaiveDateTime;
/// use sidra_loader::processing::{pivot, PivotOptions};
/// use sidra_loader::types::{RawRecord, RunMetadata, Value};
///
/// let meta = RunMetadata {
///     table_id: "t".into(),
///     extracted_at: NaiveDateTime::default(),
///     geo_partition: "n1".into(),
/// };
/// let rec = |v: &str, cat: &str, ent: &str| {
///     let mut d = BTreeMap::new();
///     d.insert("value".to_string(), v.to_string());
///     d.insert("category".to_string(), cat.to_string());
///     d.insert("entity".to_string(), ent.to_string());
///     RawRecord::new(d, meta.clone())
/// };
/// let records = vec![rec("12.5", "Men", "A"), rec("7.0", "Women", "A"), rec("bad", "Men", "B")];
/// let opts = PivotOptions {
///     key_dimensions: vec!["entity".into()],
///     pivot_dimension: "category".into(),
///     value_field: "value".into(),
///     ..Default::default()
/// };
///
/// let wide = pivot(&records, &opts).unwrap();
/// assert_eq!(wide.schema.columns, vec!["entity", "men", "women"]);
/// assert_eq!(wide.rows, vec![vec![Value::Utf8("A".into()), Value::Float64(12.5), Value::Float64(7.0)]]);
/// ```
pub fn pivot(records: &[RawRecord], options: &PivotOptions) -> LoadResult<WideTable> {
    if records.is_empty() {
        return Err(LoadError::EmptyResult {
            message: "no records to pivot".to_string(),
        });
    }
    check_required_fields(records, options)?;

    let mut key_index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut keys: Vec<Vec<Value>> = Vec::new();
    let mut cells: Vec<Vec<Option<Value>>> = Vec::new();

    let mut pivot_index: HashMap<String, usize> = HashMap::new();
    let mut pivot_labels: Vec<String> = Vec::new();

    let mut dropped = 0usize;
    let mut duplicates = 0usize;

    for record in records {
        let Some(measurement) = record.field(&options.value_field).and_then(|v| coerce_numeric(&v))
        else {
            dropped += 1;
            continue;
        };

        let key_values: Vec<Value> = options
            .key_dimensions
            .iter()
            .map(|k| record.field(k).unwrap_or(Value::Null))
            .collect();
        let key_text: Vec<String> = key_values.iter().map(ToString::to_string).collect();
        let row = *key_index.entry(key_text).or_insert_with(|| {
            keys.push(key_values);
            cells.push(Vec::new());
            keys.len() - 1
        });

        let label = record
            .field(&options.pivot_dimension)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let col = *pivot_index.entry(label.clone()).or_insert_with(|| {
            pivot_labels.push(label);
            pivot_labels.len() - 1
        });

        let row_cells = &mut cells[row];
        if row_cells.len() <= col {
            row_cells.resize(col + 1, None);
        }
        if row_cells[col].is_some() {
            duplicates += 1;
        } else {
            row_cells[col] = Some(measurement);
        }
    }

    if keys.is_empty() {
        return Err(LoadError::EmptyResult {
            message: format!(
                "no numeric '{}' values left after coercion ({dropped} records dropped)",
                options.value_field
            ),
        });
    }

    let width = pivot_labels.len();
    let rows: Vec<Vec<Value>> = keys
        .into_iter()
        .zip(cells)
        .map(|(mut row, mut row_cells)| {
            row_cells.resize(width, None);
            row.extend(
                row_cells
                    .into_iter()
                    .map(|c| c.unwrap_or_else(|| options.fill_value.clone())),
            );
            row
        })
        .collect();

    let reserved: Vec<&str> = options.reserved_names.iter().map(String::as_str).collect();
    let columns = normalize_identifiers(
        options.key_dimensions.iter().chain(pivot_labels.iter()),
        options.max_identifier_length,
        &reserved,
    );

    if dropped > 0 || duplicates > 0 {
        debug!(dropped, duplicates, "records discarded during pivot");
    }
    info!(
        rows = rows.len(),
        columns = columns.len(),
        pivot_columns = width,
        "pivoted records"
    );

    Ok(WideTable::new(Schema::new(columns), rows))
}

fn check_required_fields(records: &[RawRecord], options: &PivotOptions) -> LoadResult<()> {
    let required = std::iter::once(&options.value_field)
        .chain(std::iter::once(&options.pivot_dimension))
        .chain(options.key_dimensions.iter());
    for name in required {
        if let Some(pos) = records.iter().position(|r| !r.has_field(name)) {
            return Err(LoadError::SchemaMismatch {
                message: format!("record {} missing required field '{name}'", pos + 1),
            });
        }
    }
    Ok(())
}

/// Coerce a measurement to a number.
///
/// Integer text becomes [`Value::Int64`], other finite decimals [`Value::Float64`]. Anything
/// else (including SIDRA placeholders such as `-`, `..`, `...` and `X`) yields `None`.
pub fn coerce_numeric(value: &Value) -> Option<Value> {
    match value {
        Value::Int64(_) => Some(value.clone()),
        Value::Float64(f) if f.is_finite() => Some(value.clone()),
        Value::Utf8(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Value::Int64(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::types::RunMetadata;

    fn metadata() -> RunMetadata {
        RunMetadata {
            table_id: "4093".to_string(),
            extracted_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            geo_partition: "n3".to_string(),
        }
    }

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let dims: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RawRecord::new(dims, metadata())
    }

    fn obs(value: &str, category: &str, entity: &str) -> RawRecord {
        record(&[("value", value), ("category", category), ("entity", entity)])
    }

    fn simple_options() -> PivotOptions {
        PivotOptions {
            key_dimensions: vec!["entity".to_string()],
            pivot_dimension: "category".to_string(),
            value_field: "value".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn non_numeric_rows_are_dropped() {
        let records = vec![obs("12.5", "Men", "A"), obs("7.0", "Women", "A"), obs("bad", "Men", "B")];
        let wide = pivot(&records, &simple_options()).unwrap();

        assert_eq!(wide.schema.columns, vec!["entity", "men", "women"]);
        assert_eq!(wide.row_count(), 1);
        assert_eq!(wide.cell(0, "entity"), Some(&Value::Utf8("A".into())));
        assert_eq!(wide.cell(0, "men"), Some(&Value::Float64(12.5)));
        assert_eq!(wide.cell(0, "women"), Some(&Value::Float64(7.0)));
    }

    #[test]
    fn first_occurrence_wins_for_duplicates() {
        let records = vec![obs("1", "Men", "A"), obs("99", "Men", "A"), obs("2", "Women", "A")];
        let wide = pivot(&records, &simple_options()).unwrap();
        assert_eq!(wide.cell(0, "men"), Some(&Value::Int64(1)));
        assert_eq!(wide.cell(0, "women"), Some(&Value::Int64(2)));
    }

    #[test]
    fn missing_pairs_are_filled_with_zero() {
        let records = vec![obs("3", "Men", "A"), obs("4", "Women", "B")];
        let wide = pivot(&records, &simple_options()).unwrap();

        assert_eq!(wide.row_count(), 2);
        assert_eq!(wide.cell(0, "men"), Some(&Value::Int64(3)));
        assert_eq!(wide.cell(0, "women"), Some(&Value::Int64(0)));
        assert_eq!(wide.cell(1, "men"), Some(&Value::Int64(0)));
        assert_eq!(wide.cell(1, "women"), Some(&Value::Int64(4)));
        assert!(wide.rows.iter().all(|r| r.len() == wide.column_count()));
    }

    #[test]
    fn pivot_is_deterministic() {
        let records = vec![
            obs("5", "B", "y"),
            obs("6", "A", "x"),
            obs("7", "A", "y"),
            obs("8", "B", "x"),
            obs("9", "B", "x"),
        ];
        let first = pivot(&records, &simple_options()).unwrap();
        let second = pivot(&records, &simple_options()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.schema.columns, vec!["entity", "b", "a"]);
        assert_eq!(first.cell(1, "b"), Some(&Value::Int64(8)));
    }

    #[test]
    fn missing_required_field_is_schema_mismatch() {
        let records = vec![obs("1", "Men", "A"), record(&[("value", "2"), ("entity", "B")])];
        let err = pivot(&records, &simple_options()).unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("record 2 missing required field 'category'"));
    }

    #[test]
    fn all_values_invalid_is_empty_result() {
        let records = vec![obs("-", "Men", "A"), obs("...", "Women", "A"), obs("X", "Men", "B")];
        let err = pivot(&records, &simple_options()).unwrap_err();
        assert!(matches!(err, LoadError::EmptyResult { .. }));

        let err = pivot(&[], &simple_options()).unwrap_err();
        assert!(matches!(err, LoadError::EmptyResult { .. }));
    }

    #[test]
    fn default_layout_keys_on_metadata() {
        let records = vec![
            record(&[("V", "10"), ("D1N", "Pessoas ocupadas"), ("D2N", "2023"), ("D3N", "Brasil")]),
            record(&[("V", "20.5"), ("D1N", "Taxa (%)"), ("D2N", "2023"), ("D3N", "Brasil")]),
        ];
        let wide = pivot(&records, &PivotOptions::default()).unwrap();

        assert_eq!(
            wide.schema.columns,
            vec![
                "d2n",
                "d3n",
                "tabela_id",
                "data_extracao",
                "nivel_geografico",
                "pessoas_ocupadas",
                "taxa"
            ]
        );
        assert_eq!(wide.row_count(), 1);
        assert!(matches!(wide.cell(0, "data_extracao"), Some(Value::Timestamp(_))));
        assert_eq!(wide.cell(0, "taxa"), Some(&Value::Float64(20.5)));
    }

    #[test]
    fn reserved_names_push_columns_aside() {
        let records = vec![obs("1", "id", "A")];
        let opts = PivotOptions {
            reserved_names: vec!["id".to_string()],
            ..simple_options()
        };
        let wide = pivot(&records, &opts).unwrap();
        assert_eq!(wide.schema.columns, vec!["entity", "id_2"]);
    }

    #[test]
    fn coerce_numeric_rejects_placeholders() {
        assert_eq!(coerce_numeric(&Value::Utf8(" 42 ".into())), Some(Value::Int64(42)));
        assert_eq!(coerce_numeric(&Value::Utf8("1e3".into())), Some(Value::Float64(1000.0)));
        assert_eq!(coerce_numeric(&Value::Utf8("".into())), None);
        assert_eq!(coerce_numeric(&Value::Utf8("NaN".into())), None);
        assert_eq!(coerce_numeric(&Value::Utf8("..".into())), None);
        assert_eq!(coerce_numeric(&Value::Null), None);
    }
}
