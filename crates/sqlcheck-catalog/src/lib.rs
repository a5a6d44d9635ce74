//! Database access for sqlcheck
//!
//! - [`DbConnection`]: the connection seam every check stage talks through
//! - [`PostgresConnection`]: tokio-postgres implementation (feature `postgres`)
//! - [`MockConnection`]: scripted in-memory implementation for tests
//! - [`SchemaIntrospector`] and [`ColumnOriginTracer`]: build the
//!   [`SchemaSnapshot`] used to type described result columns
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlcheck_catalog::{PostgresConnection, SchemaIntrospector};
//!
//! let conn = PostgresConnection::connect("postgres://localhost/app", false).await?;
//! let snapshot = SchemaIntrospector::new(&conn).snapshot().await?;
//! ```

pub mod connection;
pub mod introspect;
pub mod mock;
pub mod origin;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use connection::{DbConnection, DbError, DescribedColumn, TableColumnRow, ViewDefinitionRow};
pub use introspect::{
    ColumnInfo, ColumnKey, ColumnOrigin, IntrospectError, SchemaIntrospector, SchemaSnapshot,
    TableCatalog, UniqueColumns, ViewCatalog,
};
pub use mock::MockConnection;
pub use origin::ColumnOriginTracer;

#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;
