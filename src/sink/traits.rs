use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Task join error: {0}")]
    Join(String),
}

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: Option<String>, table: impl Into<String>) -> Self {
        Self {
            schema,
            table: table.into(),
        }
    }

    /// Quoted form for use in SQL text.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.table)),
            None => quote_ident(&self.table),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
}

/// A relational destination the loader can resume from and write into.
///
/// Calls block; the loader drives them from worker threads.
pub trait Destination: Send + Sync {
    /// Largest value of `offset_column`, restricted to rows whose `scope.0`
    /// column equals `scope.1` when a scope is given.
    fn max_offset(
        &self,
        table: &TableRef,
        offset_column: &str,
        scope: Option<(&str, &str)>,
    ) -> Result<Option<i64>, SinkError>;

    /// A separate connection for one writer.
    fn connect(&self) -> Result<Box<dyn DestinationSession>, SinkError>;
}

pub trait DestinationSession: Send {
    /// Insert `rows` as one statement, skipping rows that hit a uniqueness
    /// constraint. Returns the number of rows actually inserted.
    fn insert_ignore(
        &mut self,
        table: &TableRef,
        columns: &[String],
        rows: &[Vec<FieldValue>],
    ) -> Result<usize, SinkError>;

    fn commit(&mut self) -> Result<(), SinkError>;
}
