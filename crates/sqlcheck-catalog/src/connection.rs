//! Database connection trait used by every stage of a check pass

use sqlcheck_core::PostgreSqlError;

/// One result column reported by the describe protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedColumn {
    /// Column name as returned to the client
    pub name: String,

    /// `pg_type.oid` of the column type
    pub type_oid: u32,

    /// Origin relation oid (0 if the column is not a plain relation column)
    pub table_oid: u32,

    /// Origin column number (0 if none)
    pub column_id: i16,
}

impl DescribedColumn {
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
            table_oid: 0,
            column_id: 0,
        }
    }

    /// Set the origin relation column
    pub fn from_column(mut self, table_oid: u32, column_id: i16) -> Self {
        self.table_oid = table_oid;
        self.column_id = column_id;
        self
    }
}

/// One column of an ordinary table, from `pg_attribute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumnRow {
    pub table_oid: u32,
    pub table_name: String,
    pub column_id: i16,
    pub column_name: String,
    pub not_null: bool,
}

/// A live view and its definition as printed by `pg_get_viewdef`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinitionRow {
    pub view_oid: u32,
    pub view_name: String,
    pub definition: String,
}

/// Errors that can occur when talking to the database
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbError {
    /// The engine rejected a statement
    #[error("SQL error: {0}")]
    Sql(PostgreSqlError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl DbError {
    /// The structured engine error, if this is one
    pub fn as_sql_error(&self) -> Option<&PostgreSqlError> {
        match self {
            Self::Sql(err) => Some(err),
            _ => None,
        }
    }
}

/// A single database connection
///
/// Statements are issued strictly one after another; implementations need
/// no internal locking beyond what their client already does.
#[async_trait::async_trait]
pub trait DbConnection: Send + Sync {
    /// Get the connection name (e.g., "PostgreSQL")
    fn name(&self) -> &'static str;

    /// Plan `sql` without executing it
    ///
    /// Returns `None` when the statement produces no row description.
    async fn describe(&self, sql: &str) -> Result<Option<Vec<DescribedColumn>>, DbError>;

    /// Execute one or more statements for their effect
    async fn execute(&self, sql: &str) -> Result<(), DbError>;

    /// All columns of ordinary tables
    async fn table_columns(&self) -> Result<Vec<TableColumnRow>, DbError>;

    /// `(oid, typname)` for every type
    async fn type_names(&self) -> Result<Vec<(u32, String)>, DbError>;

    /// Views in the `public` schema
    async fn view_definitions(&self) -> Result<Vec<ViewDefinitionRow>, DbError>;

    /// Test the connection to the database
    async fn test_connection(&self) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn described_column_origin() {
        let col = DescribedColumn::new("id", 23).from_column(16384, 1);
        assert_eq!(col.table_oid, 16384);
        assert_eq!(col.column_id, 1);

        let literal = DescribedColumn::new("one", 23);
        assert_eq!(literal.table_oid, 0);
    }

    #[test]
    fn sql_error_accessor() {
        let err = DbError::Sql(PostgreSqlError::new("42601", "syntax error at or near \"FORM\""));
        assert_eq!(err.as_sql_error().map(|e| e.code.as_str()), Some("42601"));
        assert!(DbError::Connection("closed".into()).as_sql_error().is_none());
    }
}
