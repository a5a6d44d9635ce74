//! SQL parsing using datafusion-sqlparser-rs
//!
//! Only the PostgreSQL dialect is used: everything parsed here is either a
//! query about to be described by PostgreSQL or a view definition printed
//! back by `pg_get_viewdef`.

use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};

/// SQL parser for the PostgreSQL dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlParser;

impl SqlParser {
    pub fn postgres() -> Self {
        Self
    }

    /// Parse SQL string into AST
    pub fn parse(&self, sql: &str) -> Result<ParsedSql, ParseError> {
        match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
            Ok(statements) => Ok(ParsedSql {
                sql: sql.to_string(),
                statements,
            }),
            Err(error) => Err(ParseError {
                sql: sql.to_string(),
                error,
            }),
        }
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,
}

impl ParsedSql {
    pub fn first_statement(&self) -> Option<&Statement> {
        self.statements.first()
    }
}

/// SQL parsing error
#[derive(Debug, thiserror::Error)]
#[error("SQL parse error: {error}")]
pub struct ParseError {
    /// Original SQL string
    pub sql: String,

    #[source]
    pub error: ParserError,
}
