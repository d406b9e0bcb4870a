use super::traits::{quote_ident, Destination, DestinationSession, FieldValue, SinkError, TableRef};
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

impl From<duckdb::Error> for SinkError {
    fn from(e: duckdb::Error) -> Self {
        SinkError::Database(e.to_string())
    }
}

/// DuckDB implementation of the Destination trait
pub struct DuckDbDestination {
    conn: Mutex<Connection>,
}

impl DuckDbDestination {
    /// Open a database file, or an in-memory database for `:memory:`.
    pub fn open(connection: &str) -> Result<Self, SinkError> {
        if connection == ":memory:" {
            return Self::in_memory();
        }

        let path = Path::new(connection);
        let conn = Connection::open(path)?;
        tracing::info!(database = %path.display(), "opened DuckDB destination");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory DuckDB destination (for testing)
    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Another connection to the same database.
    pub fn connection(&self) -> Result<Connection, SinkError> {
        Ok(self.lock()?.try_clone()?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), SinkError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SinkError> {
        self.conn
            .lock()
            .map_err(|_| SinkError::Database("connection lock poisoned".to_string()))
    }
}

impl Destination for DuckDbDestination {
    fn max_offset(
        &self,
        table: &TableRef,
        offset_column: &str,
        scope: Option<(&str, &str)>,
    ) -> Result<Option<i64>, SinkError> {
        let mut sql = format!(
            "SELECT max({}) FROM {}",
            quote_ident(offset_column),
            table.qualified()
        );
        let conn = self.lock()?;

        let value = match scope {
            Some((column, identity)) => {
                sql.push_str(&format!(" WHERE {} = ?", quote_ident(column)));
                conn.query_row(&sql, params![identity], |row| row.get::<_, Option<i64>>(0))?
            }
            None => conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))?,
        };

        Ok(value)
    }

    fn connect(&self) -> Result<Box<dyn DestinationSession>, SinkError> {
        let conn = self.lock()?.try_clone()?;
        Ok(Box::new(DuckDbSession {
            conn,
            in_transaction: false,
        }))
    }
}

pub struct DuckDbSession {
    conn: Connection,
    in_transaction: bool,
}

impl DestinationSession for DuckDbSession {
    fn insert_ignore(
        &mut self,
        table: &TableRef,
        columns: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        if !self.in_transaction {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            self.in_transaction = true;
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
            table.qualified(),
            column_list,
            vec![placeholders; rows.len()].join(", ")
        );

        let params = rows.iter().flatten().map(to_value);
        let inserted = self.conn.execute(&sql, params_from_iter(params))?;
        Ok(inserted)
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

fn to_value(field: &FieldValue) -> Value {
    match field {
        FieldValue::Null => Value::Null,
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Int(n) => Value::BigInt(*n),
    }
}
