//! Relational storage: SQL dialects and the connection seam used by the load coordinator.
//!
//! The coordinator only talks to [`StorageConnector`] / [`StorageConnection`]; it never
//! holds a connection across tables. [`sqlite::SqliteConnector`] is the shipped backend.
//! [`Dialect::SqlServer`] renders the same statements for SQL Server.
//!
//! Every destination table gets two surrogate columns besides its data columns:
//! [`SURROGATE_ID`] (auto-increment primary key) and [`SURROGATE_CREATED_AT`] (insert
//! time). Data columns must not use those names; pass [`RESERVED_COLUMNS`] to the pivot.

pub mod sqlite;

use crate::error::LoadResult;
use crate::processing::TableDefinition;
use crate::types::{DataType, Value};

pub use sqlite::{SqliteConnection, SqliteConnector};

/// Surrogate primary-key column added to every created table.
pub const SURROGATE_ID: &str = "id";
/// Surrogate insert-time column added to every created table.
pub const SURROGATE_CREATED_AT: &str = "created_at";
/// Names data columns must never take.
pub const RESERVED_COLUMNS: [&str; 2] = [SURROGATE_ID, SURROGATE_CREATED_AT];

/// SQL flavour used to render DDL and DML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite 3.
    Sqlite,
    /// Microsoft SQL Server.
    SqlServer,
}

impl Dialect {
    /// Column type for a [`DataType`].
    pub fn column_type(self, data_type: DataType) -> &'static str {
        match (self, data_type) {
            (Dialect::Sqlite, DataType::Text) => "TEXT",
            (Dialect::Sqlite, DataType::Integer) => "INTEGER",
            (Dialect::Sqlite, DataType::Float) => "REAL",
            (Dialect::Sqlite, DataType::Timestamp) => "TEXT",
            (Dialect::Sqlite, DataType::Boolean) => "INTEGER",
            (Dialect::SqlServer, DataType::Text) => "NVARCHAR(255)",
            (Dialect::SqlServer, DataType::Integer) => "INT",
            (Dialect::SqlServer, DataType::Float) => "FLOAT",
            (Dialect::SqlServer, DataType::Timestamp) => "DATETIME",
            (Dialect::SqlServer, DataType::Boolean) => "BIT",
        }
    }

    /// Quote an identifier.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// `CREATE TABLE` for `def` that does nothing if the table already exists.
    ///
    /// Existing tables are reused as they are; no columns are added or altered.
    pub fn create_table_sql(self, def: &TableDefinition) -> String {
        let mut columns: Vec<String> = Vec::with_capacity(def.columns.len() + 2);
        columns.push(match self {
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote(SURROGATE_ID)),
            Dialect::SqlServer => format!("{} INT IDENTITY(1,1) PRIMARY KEY", self.quote(SURROGATE_ID)),
        });
        columns.extend(
            def.columns
                .iter()
                .map(|c| format!("{} {}", self.quote(&c.name), self.column_type(c.data_type))),
        );
        columns.push(match self {
            Dialect::Sqlite => format!(
                "{} TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
                self.quote(SURROGATE_CREATED_AT)
            ),
            Dialect::SqlServer => format!("{} DATETIME DEFAULT GETDATE()", self.quote(SURROGATE_CREATED_AT)),
        });
        self.create_if_absent(&def.name, &columns)
    }

    /// Statement removing every row of `table`.
    pub fn truncate_sql(self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!("DELETE FROM {}", self.quote(table)),
            Dialect::SqlServer => format!("TRUNCATE TABLE {}", self.quote(table)),
        }
    }

    /// Parameterized single-row `INSERT` for `columns`.
    pub fn insert_sql<'a>(self, table: &str, columns: impl IntoIterator<Item = &'a str>) -> String {
        let quoted: Vec<String> = columns.into_iter().map(|c| self.quote(c)).collect();
        let placeholders = vec!["?"; quoted.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.quote(table),
            quoted.join(", ")
        )
    }

    /// `CREATE TABLE` for the outcome log.
    pub fn outcome_table_sql(self, table: &str) -> String {
        let text = self.column_type(DataType::Text);
        let int = self.column_type(DataType::Integer);
        let ts = self.column_type(DataType::Timestamp);
        let columns = match self {
            Dialect::Sqlite => vec![
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote(SURROGATE_ID)),
                format!("{} {text} NOT NULL", self.quote("table_id")),
                format!("{} {text}", self.quote("partition_key")),
                format!("{} {ts} NOT NULL", self.quote("extracted_at")),
                format!("{} {int} NOT NULL", self.quote("record_count")),
                format!("{} {text} NOT NULL", self.quote("status")),
                format!("{} {text}", self.quote("message")),
                format!("{} TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP", self.quote(SURROGATE_CREATED_AT)),
            ],
            Dialect::SqlServer => vec![
                format!("{} INT IDENTITY(1,1) PRIMARY KEY", self.quote(SURROGATE_ID)),
                format!("{} NVARCHAR(50) NOT NULL", self.quote("table_id")),
                format!("{} NVARCHAR(50)", self.quote("partition_key")),
                format!("{} {ts} NOT NULL", self.quote("extracted_at")),
                format!("{} {int} NOT NULL", self.quote("record_count")),
                format!("{} NVARCHAR(50) NOT NULL", self.quote("status")),
                format!("{} NVARCHAR(MAX)", self.quote("message")),
                format!("{} DATETIME DEFAULT GETDATE()", self.quote(SURROGATE_CREATED_AT)),
            ],
        };
        self.create_if_absent(table, &columns)
    }

    /// `INSERT` for one outcome-log row; parameters follow [`OUTCOME_COLUMNS`].
    pub fn outcome_insert_sql(self, table: &str) -> String {
        self.insert_sql(table, OUTCOME_COLUMNS)
    }

    fn create_if_absent(self, table: &str, columns: &[String]) -> String {
        match self {
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                self.quote(table),
                columns.join(", ")
            ),
            Dialect::SqlServer => format!(
                "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({})",
                table.replace('\'', "''"),
                self.quote(table),
                columns.join(", ")
            ),
        }
    }
}

/// Columns written per outcome-log row, in parameter order.
pub const OUTCOME_COLUMNS: [&str; 6] = [
    "table_id",
    "partition_key",
    "extracted_at",
    "record_count",
    "status",
    "message",
];

/// An open connection scoped to one table load. Dropping it closes it.
pub trait StorageConnection {
    /// SQL flavour this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute one statement; returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> LoadResult<usize>;

    /// Execute one parameterized statement once per row; returns the total affected rows.
    fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> LoadResult<usize>;

    /// Start a transaction.
    fn begin(&mut self) -> LoadResult<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> LoadResult<()>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> LoadResult<()>;
}

/// Opens [`StorageConnection`]s.
pub trait StorageConnector {
    /// Connection type produced.
    type Connection: StorageConnection;

    /// Open a fresh connection.
    fn connect(&self) -> LoadResult<Self::Connection>;
}

impl<T: StorageConnector + ?Sized> StorageConnector for &T {
    type Connection = T::Connection;

    fn connect(&self) -> LoadResult<Self::Connection> {
        (**self).connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnSpec;

    fn definition() -> TableDefinition {
        TableDefinition {
            name: "pnad_pivoted_4093".to_string(),
            columns: vec![
                ColumnSpec::new("d3n", DataType::Text),
                ColumnSpec::new("data_extracao", DataType::Timestamp),
                ColumnSpec::new("taxa", DataType::Float),
                ColumnSpec::new("pessoas", DataType::Integer),
                ColumnSpec::new("flag", DataType::Boolean),
            ],
        }
    }

    #[test]
    fn sqlite_create_table_has_surrogates_around_data_columns() {
        let sql = Dialect::Sqlite.create_table_sql(&definition());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"pnad_pivoted_4093\" (\
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"d3n\" TEXT, \"data_extracao\" TEXT, \"taxa\" REAL, \"pessoas\" INTEGER, \"flag\" INTEGER, \
             \"created_at\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn sql_server_uses_its_own_types() {
        let sql = Dialect::SqlServer.create_table_sql(&definition());
        assert!(sql.starts_with("IF OBJECT_ID(N'pnad_pivoted_4093', N'U') IS NULL CREATE TABLE [pnad_pivoted_4093]"));
        assert!(sql.contains("[id] INT IDENTITY(1,1) PRIMARY KEY"));
        assert!(sql.contains("[d3n] NVARCHAR(255)"));
        assert!(sql.contains("[data_extracao] DATETIME"));
        assert!(sql.contains("[taxa] FLOAT"));
        assert!(sql.contains("[pessoas] INT,"));
        assert!(sql.contains("[flag] BIT"));
        assert!(sql.ends_with("[created_at] DATETIME DEFAULT GETDATE())"));
        assert_eq!(Dialect::SqlServer.truncate_sql("t"), "TRUNCATE TABLE [t]");
    }

    #[test]
    fn insert_uses_positional_placeholders() {
        let sql = Dialect::Sqlite.insert_sql("t", ["a", "b", "c"]);
        assert_eq!(sql, "INSERT INTO \"t\" (\"a\", \"b\", \"c\") VALUES (?, ?, ?)");
        assert_eq!(Dialect::Sqlite.truncate_sql("t"), "DELETE FROM \"t\"");
    }

    #[test]
    fn quoting_escapes_delimiters() {
        assert_eq!(Dialect::Sqlite.quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::SqlServer.quote("a]b"), "[a]]b]");
    }

    #[test]
    fn outcome_log_statements() {
        let ddl = Dialect::Sqlite.outcome_table_sql("extraction_log");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"extraction_log\""));
        for col in OUTCOME_COLUMNS {
            assert!(ddl.contains(&format!("\"{col}\"")), "missing {col}");
        }
        let insert = Dialect::Sqlite.outcome_insert_sql("extraction_log");
        assert!(insert.ends_with("VALUES (?, ?, ?, ?, ?, ?)"));
    }
}
