//! In-memory reshaping and schema inference.
//!
//! The processing layer turns a long-form [`crate::types::RawRecord`] batch into a
//! [`crate::types::WideTable`] and derives the destination column types from it. It is
//! purely in-memory and performs no I/O.
//!
//! - [`pivot()`]: long-to-wide pivot with numeric coercion and first-wins duplicates
//! - [`synthesize()`]: per-column type inference
//! - [`table_definition()`]: the create-if-absent description handed to storage
//!
//! ## Example: pivot → synthesize
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use chrono::NaiveDateTime;
//! use sidra_loader::processing::{pivot, synthesize, PivotOptions};
//! use sidra_loader::types::{DataType, RawRecord, RunMetadata};
//!
//! let meta = RunMetadata {
//!     table_id: "5440".into(),
//!     extracted_at: NaiveDateTime::default(),
//!     geo_partition: "n1".into(),
//! };
//! let mut dims = BTreeMap::new();
//! dims.insert("V".to_string(), "1500".to_string());
//! dims.insert("D1N".to_string(), "Pessoas ocupadas".to_string());
//! dims.insert("D2N".to_string(), "2023".to_string());
//! dims.insert("D3N".to_string(), "Brasil".to_string());
//!
//! let wide = pivot(&[RawRecord::new(dims, meta)], &PivotOptions::default()).unwrap();
//! let specs = synthesize(&wide);
//!
//! assert_eq!(specs.last().unwrap().name, "pessoas_ocupadas");
//! assert_eq!(specs.last().unwrap().data_type, DataType::Integer);
//! ```

pub mod pivot;
pub mod schema;

pub use pivot::{coerce_numeric, pivot, PivotOptions};
pub use schema::{infer_column_type, synthesize, table_definition, TableDefinition};
