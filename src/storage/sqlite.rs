//! SQLite backend (`rusqlite`).

use std::path::{Path, PathBuf};

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use tracing::debug;

use crate::error::LoadResult;
use crate::types::{TIMESTAMP_FORMAT, Value};

use super::{Dialect, StorageConnection, StorageConnector};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Int64(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::Float64(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::Bool(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::Utf8(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(ts) => ToSqlOutput::Owned(Sql::Text(ts.format(TIMESTAMP_FORMAT).to_string())),
        })
    }
}

/// Opens connections to one SQLite database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Connector for the database at `path` (created on first connect).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageConnector for SqliteConnector {
    type Connection = SqliteConnection;

    fn connect(&self) -> LoadResult<SqliteConnection> {
        debug!(path = %self.path.display(), "opening sqlite database");
        Ok(SqliteConnection {
            conn: Connection::open(&self.path)?,
        })
    }
}

/// An open SQLite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> LoadResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Engine version string (`SELECT sqlite_version()`).
    pub fn version(&self) -> LoadResult<String> {
        Ok(self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
    }

    /// User tables and their row counts, ordered by name.
    pub fn list_tables(&self) -> LoadResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let sql = format!("SELECT COUNT(*) FROM {}", Dialect::Sqlite.quote(&name));
            let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            out.push((name, count));
        }
        Ok(out)
    }

    /// Column names of `table` in declaration order; empty if the table does not exist.
    pub fn table_columns(&self, table: &str) -> LoadResult<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", Dialect::Sqlite.quote(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cols)
    }

    /// Borrow the underlying `rusqlite` connection.
    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}

impl StorageConnection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> LoadResult<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Vec<Value>]) -> LoadResult<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut affected = 0usize;
        for row in rows {
            affected += stmt.execute(params_from_iter(row.iter()))?;
        }
        Ok(affected)
    }

    fn begin(&mut self) -> LoadResult<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> LoadResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> LoadResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::processing::TableDefinition;
    use crate::types::{ColumnSpec, DataType};

    fn setup() -> SqliteConnection {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let def = TableDefinition {
            name: "t".to_string(),
            columns: vec![
                ColumnSpec::new("name", DataType::Text),
                ColumnSpec::new("n", DataType::Integer),
                ColumnSpec::new("at", DataType::Timestamp),
            ],
        };
        conn.execute(&Dialect::Sqlite.create_table_sql(&def), &[]).unwrap();
        conn
    }

    #[test]
    fn execute_many_binds_typed_values() {
        let mut conn = setup();
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let sql = Dialect::Sqlite.insert_sql("t", ["name", "n", "at"]);
        let inserted = conn
            .execute_many(
                &sql,
                &[
                    vec![Value::Utf8("a".into()), Value::Int64(1), Value::Timestamp(ts)],
                    vec![Value::Utf8("b".into()), Value::Null, Value::Timestamp(ts)],
                ],
            )
            .unwrap();
        assert_eq!(inserted, 2);

        let (n, at): (Option<i64>, String) = conn
            .raw()
            .query_row("SELECT n, at FROM t WHERE name = 'a'", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(n, Some(1));
        assert_eq!(at, "2024-05-01 08:30:00");
        assert_eq!(conn.table_columns("t").unwrap(), vec!["id", "name", "n", "at", "created_at"]);
    }

    #[test]
    fn rollback_discards_uncommitted_rows() {
        let mut conn = setup();
        let sql = Dialect::Sqlite.insert_sql("t", ["name"]);
        conn.begin().unwrap();
        conn.execute(&sql, &[Value::Utf8("x".into())]).unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.list_tables().unwrap(), vec![("t".to_string(), 0)]);
    }

    #[test]
    fn version_is_reported() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        assert!(conn.version().unwrap().starts_with('3'));
    }
}
