//! Query validation against a live connection
//!
//! One round-trip per query: the resolved text is described (planned, never
//! executed) and the reported result columns are checked in this order:
//! 1. statements without a row description must declare no columns
//! 2. result column names must be unique
//! 3. the actual column map must equal the declared one

use sqlcheck_catalog::{
    DbConnection, DbError, DescribedColumn, IntrospectError, SchemaSnapshot, UniqueColumns,
};
use sqlcheck_core::{
    ColumnTypes, Config, Diagnostic, DiagnosticCode, ExpectedColumns, PostgreSqlError,
    ResolvedQuery, TypeRenderer,
};
use sqlcheck_sql::OuterJoinAnalysis;

/// Outcome of validating one query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAnswer {
    NoErrors,

    /// The engine rejected the query
    DescribeError(PostgreSqlError),

    /// Names that occur more than once, in order of first occurrence
    DuplicateColumnNames(Vec<String>),

    /// Rendered actual shape to suggest instead of the declared one
    WrongColumnTypes(String),
}

/// Fatal errors while validating a query
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Introspect(#[from] IntrospectError),
}

/// Validates resolved queries
#[derive(Debug, Clone, Default)]
pub struct QueryValidator {
    unique: UniqueColumns,
    renderer: TypeRenderer,
}

impl QueryValidator {
    pub fn new(config: &Config) -> Self {
        Self {
            unique: UniqueColumns::from_config(&config.unique_table_column_types),
            renderer: config.type_renderer(),
        }
    }

    /// Describe `query` and compare its result columns with the declared ones
    ///
    /// Engine errors become [`QueryAnswer::DescribeError`]; transport errors
    /// and unknown types are fatal.
    pub async fn validate<C: DbConnection + ?Sized>(
        &self,
        conn: &C,
        snapshot: &SchemaSnapshot,
        query: &ResolvedQuery,
    ) -> Result<QueryAnswer, ValidateError> {
        tracing::debug!(file = %query.file_name, "describing query");

        let columns = match conn.describe(&query.text).await {
            Ok(columns) => columns,
            Err(DbError::Sql(err)) => {
                tracing::debug!(file = %query.file_name, "describe failed: {}", err);
                return Ok(QueryAnswer::DescribeError(err));
            }
            Err(err) => return Err(err.into()),
        };

        let Some(columns) = columns else {
            return Ok(match &query.expected {
                ExpectedColumns::Typed(types) if !types.is_empty() => {
                    QueryAnswer::WrongColumnTypes("{} (Or no type argument at all)".to_string())
                }
                _ => QueryAnswer::NoErrors,
            });
        };

        let duplicates = duplicate_names(&columns);
        if !duplicates.is_empty() {
            return Ok(QueryAnswer::DuplicateColumnNames(duplicates));
        }

        let actual = self.actual_columns(snapshot, &query.text, &columns)?;

        match &query.expected {
            ExpectedColumns::Untyped => Ok(QueryAnswer::NoErrors),
            ExpectedColumns::Typed(expected) if expected.canonical() == actual.canonical() => {
                Ok(QueryAnswer::NoErrors)
            }
            ExpectedColumns::Typed(_) => {
                Ok(QueryAnswer::WrongColumnTypes(self.renderer.render(&actual)))
            }
        }
    }

    fn actual_columns(
        &self,
        snapshot: &SchemaSnapshot,
        sql: &str,
        columns: &[DescribedColumn],
    ) -> Result<ColumnTypes, IntrospectError> {
        let analysis = OuterJoinAnalysis::from_sql(sql).unwrap_or_else(|err| {
            tracing::debug!("query not parsed, assuming no outer joins: {}", err);
            OuterJoinAnalysis::default()
        });
        if !analysis.is_empty() {
            tracing::debug!(relations = ?analysis.relations(), "query reads relations through outer joins");
        }

        columns
            .iter()
            .enumerate()
            .map(|(position, column)| {
                let column_type = snapshot.column_type(position, column, &analysis, &self.unique)?;
                Ok((column.name.clone(), column_type))
            })
            .collect()
    }
}

/// Names that reoccur later in the list
fn duplicate_names(columns: &[DescribedColumn]) -> Vec<String> {
    let mut duplicates: Vec<String> = Vec::new();

    for (i, column) in columns.iter().enumerate() {
        let repeated = columns[i + 1..].iter().any(|c| c.name == column.name);
        if repeated && !duplicates.contains(&column.name) {
            duplicates.push(column.name.clone());
        }
    }

    duplicates
}

/// Diagnostic for a query answer, `None` for [`QueryAnswer::NoErrors`]
pub fn answer_diagnostic(query: &ResolvedQuery, answer: &QueryAnswer) -> Option<Diagnostic> {
    match answer {
        QueryAnswer::NoErrors => None,
        QueryAnswer::DescribeError(err) => Some(Diagnostic::from_postgres_error(
            DiagnosticCode::SqlDescribeError,
            &query.file_name,
            &query.file_contents,
            err,
            query.span_for_position(err.position),
        )),
        QueryAnswer::DuplicateColumnNames(names) => Some(
            Diagnostic::new(
                DiagnosticCode::DuplicateColumnNames,
                &query.file_name,
                &query.file_contents,
                query.source_start,
                "Query return row contains duplicate column names:",
            )
            .with_message(serde_json::to_string_pretty(names).unwrap_or_default()),
        ),
        QueryAnswer::WrongColumnTypes(rendered) => Some(
            Diagnostic::new(
                DiagnosticCode::WrongColumnTypes,
                &query.file_name,
                &query.file_contents,
                query.type_argument_span,
                "Wrong Column Types",
            )
            .with_epilogue(format!("Fix it to:\n{}", rendered)),
        ),
    }
}
