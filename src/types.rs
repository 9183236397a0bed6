//! Core data model shared by the fetch, pivot, schema and load stages.
//!
//! Long-form input arrives as [`RawRecord`]s; the pivot produces a [`WideTable`] whose
//! [`Schema`] lists normalized column names, and schema synthesis resolves every column to
//! one [`DataType`] exactly once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;

/// Field name under which [`RunMetadata::table_id`] is exposed by [`RawRecord::field`].
pub const META_TABLE_ID: &str = "Tabela_ID";
/// Field name under which [`RunMetadata::extracted_at`] is exposed by [`RawRecord::field`].
pub const META_EXTRACTED_AT: &str = "Data_Extracao";
/// Field name under which [`RunMetadata::geo_partition`] is exposed by [`RawRecord::field`].
pub const META_GEO_PARTITION: &str = "Nivel_Geografico";

/// Format used when a [`Value::Timestamp`] is rendered as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Scalar kinds a destination column can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// UTF-8 text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point number.
    Float,
    /// Date and time without zone.
    Timestamp,
    /// Boolean.
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Timestamp => "timestamp",
            DataType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Resolved column name and type, as emitted by schema synthesis.
///
/// Names are always normalizer output, never raw source labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Normalized column identifier.
    pub name: String,
    /// Inferred scalar kind.
    pub data_type: DataType,
}

impl ColumnSpec {
    /// Create a column spec.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of normalized column names describing the shape of a [`WideTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered column names.
    pub columns: Vec<String>,
}

impl Schema {
    /// Create a new schema from column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Iterate column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Date and time without zone.
    Timestamp(NaiveDateTime),
}

impl Value {
    /// The scalar kind of this value, or `None` for nulls.
    pub fn kind(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int64(_) => Some(DataType::Integer),
            Value::Float64(_) => Some(DataType::Float),
            Value::Bool(_) => Some(DataType::Boolean),
            Value::Utf8(_) => Some(DataType::Text),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Utf8(v) => f.write_str(v),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Metadata stamped on every record of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    /// Source table identifier (e.g. `"4093"`).
    pub table_id: String,
    /// Wall-clock time of the successful fetch.
    pub extracted_at: NaiveDateTime,
    /// Partition key (geographic level) that produced the rows.
    pub geo_partition: String,
}

/// One long-form observation as returned by the remote service.
///
/// `dimensions` maps source field codes (`V`, `D1N`, `D2N`, ...) to their textual value.
/// Run metadata is reachable through [`RawRecord::field`] under the `META_*` names so it
/// can take part in a pivot key like any other dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Source fields of the observation, by code.
    pub dimensions: BTreeMap<String, String>,
    /// Metadata shared by every record of the fetch.
    pub metadata: RunMetadata,
}

impl RawRecord {
    /// Create a record from its source fields and run metadata.
    pub fn new(dimensions: BTreeMap<String, String>, metadata: RunMetadata) -> Self {
        Self {
            dimensions,
            metadata,
        }
    }

    /// Look up a field as a typed value.
    ///
    /// Source dimensions are returned as [`Value::Utf8`]; the extraction timestamp is
    /// returned as [`Value::Timestamp`]. Returns `None` if the field does not exist.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            META_TABLE_ID => Some(Value::Utf8(self.metadata.table_id.clone())),
            META_EXTRACTED_AT => Some(Value::Timestamp(self.metadata.extracted_at)),
            META_GEO_PARTITION => Some(Value::Utf8(self.metadata.geo_partition.clone())),
            _ => self.dimensions.get(name).map(|v| Value::Utf8(v.clone())),
        }
    }

    /// Look up a source dimension as raw text.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }

    /// Returns `true` if `name` resolves through [`RawRecord::field`].
    pub fn has_field(&self, name: &str) -> bool {
        matches!(name, META_TABLE_ID | META_EXTRACTED_AT | META_GEO_PARTITION)
            || self.dimensions.contains_key(name)
    }
}

/// In-memory wide-form table produced by the pivot.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl WideTable {
    /// Create a table from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Number of rows in the table.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the table.
    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    /// Iterate the values of one column, top to bottom.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(idx))
    }

    /// Look up a cell by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn metadata() -> RunMetadata {
        RunMetadata {
            table_id: "4093".to_string(),
            extracted_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(10, 22, 16)
                .unwrap(),
            geo_partition: "n3".to_string(),
        }
    }

    #[test]
    fn raw_record_exposes_metadata_as_fields() {
        let mut dims = BTreeMap::new();
        dims.insert("V".to_string(), "12.5".to_string());
        let rec = RawRecord::new(dims, metadata());

        assert_eq!(rec.field("V"), Some(Value::Utf8("12.5".to_string())));
        assert_eq!(rec.field(META_TABLE_ID), Some(Value::Utf8("4093".to_string())));
        assert_eq!(rec.field(META_GEO_PARTITION), Some(Value::Utf8("n3".to_string())));
        assert!(matches!(rec.field(META_EXTRACTED_AT), Some(Value::Timestamp(_))));
        assert!(rec.has_field(META_EXTRACTED_AT));
        assert!(!rec.has_field("D1N"));
        assert_eq!(rec.field("D1N"), None);
    }

    #[test]
    fn value_kind_matches_variant() {
        assert_eq!(Value::Null.kind(), None);
        assert_eq!(Value::Int64(1).kind(), Some(DataType::Integer));
        assert_eq!(Value::Float64(1.5).kind(), Some(DataType::Float));
        assert_eq!(Value::Bool(true).kind(), Some(DataType::Boolean));
        assert_eq!(Value::Utf8("x".into()).kind(), Some(DataType::Text));
    }

    #[test]
    fn wide_table_cell_lookup_by_name() {
        let schema = Schema::new(vec!["entity".to_string(), "men".to_string()]);
        let table = WideTable::new(
            schema,
            vec![vec![Value::Utf8("A".into()), Value::Float64(12.5)]],
        );
        assert_eq!(table.cell(0, "men"), Some(&Value::Float64(12.5)));
        assert_eq!(table.cell(0, "women"), None);
        assert_eq!(table.cell(1, "men"), None);
        assert_eq!(table.column_count(), 2);
    }
}
