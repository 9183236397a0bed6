//! Column type inference for [`WideTable`]s.

use tracing::debug;

use crate::types::{ColumnSpec, DataType, Value, WideTable};

/// A destination table description: create-if-absent, no migration of existing tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Normalized table name.
    pub name: String,
    /// Data columns in load order.
    pub columns: Vec<ColumnSpec>,
}

impl TableDefinition {
    /// Column names in load order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Infer one [`ColumnSpec`] per column of `table`, in schema order.
///
/// Each column takes the narrowest kind that covers every non-null cell:
///
/// - only booleans → [`DataType::Boolean`]
/// - only integers → [`DataType::Integer`]
/// - integers and floats → [`DataType::Float`]
/// - only timestamps → [`DataType::Timestamp`]
/// - any text cell, any other mixture, or no non-null cell at all → [`DataType::Text`]
pub fn synthesize(table: &WideTable) -> Vec<ColumnSpec> {
    table
        .schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let data_type = infer_column_type(table.column(idx));
            debug!(column = %name, %data_type, "inferred column type");
            ColumnSpec::new(name.clone(), data_type)
        })
        .collect()
}

/// Build the destination [`TableDefinition`] for `table` under the (already normalized)
/// name `table_name`.
pub fn table_definition(table_name: impl Into<String>, table: &WideTable) -> TableDefinition {
    TableDefinition {
        name: table_name.into(),
        columns: synthesize(table),
    }
}

/// Narrowest common kind of a column's values; see [`synthesize`].
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> DataType {
    let mut acc: Option<DataType> = None;
    for kind in values.into_iter().filter_map(Value::kind) {
        let next = match acc {
            None => kind,
            Some(current) => widen(current, kind),
        };
        if next == DataType::Text {
            return DataType::Text;
        }
        acc = Some(next);
    }
    acc.unwrap_or(DataType::Text)
}

fn widen(a: DataType, b: DataType) -> DataType {
    match (a, b) {
        (a, b) if a == b => a,
        (DataType::Integer, DataType::Float) | (DataType::Float, DataType::Integer) => {
            DataType::Float
        }
        _ => DataType::Text,
    }
}
