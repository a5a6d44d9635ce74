//! sqlcheck core
//!
//! Domain model shared by every crate: diagnostics with stable codes,
//! source spans, the column-type vocabulary, the query model handed over by
//! the source parser, configuration and the JSON report.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod pg_error;
pub mod schema;
pub mod query;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, SrcSpan};
pub use pg_error::PostgreSqlError;
pub use schema::{ColNullability, ColumnType, ColumnTypes, NamedColumn, SqlType, TypeRenderer};
pub use query::{
    ExpectedColumns, QualifiedViewName, QueryCallExpression, QueryFragment, ResolvedQuery,
    SourceMap, TypeArgument,
};
pub use report::{Report, ReportSummary, REPORT_VERSION};
pub use config::{Config, ConfigError, CustomSqlTypeMapping, PostgresConfig, UniqueTableColumnType};
