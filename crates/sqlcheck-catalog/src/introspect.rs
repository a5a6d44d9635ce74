//! Schema introspection
//!
//! A [`SchemaSnapshot`] answers two questions for the validator: what
//! semantic type an engine type oid stands for, and whether a result column
//! attributed to `(relation oid, column number)` is provably not null.
//!
//! The snapshot has two halves with different lifetimes:
//! - [`TableCatalog`]: table column nullability and the type table, read once
//!   per schema epoch (after every migration replay)
//! - [`ViewCatalog`]: view column nullability traced through view definitions,
//!   rebuilt whenever the live set of views changes
//!
//! Both halves are behind `Arc`, so refreshing the views of a snapshot shares
//! the table half instead of reloading it.

use crate::connection::{DbConnection, DbError, DescribedColumn};
use crate::origin::ColumnOriginTracer;
use sqlcheck_core::{ColNullability, ColumnType, SqlType, UniqueTableColumnType};
use sqlcheck_sql::OuterJoinAnalysis;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Engine-level handle for one column of one table or view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    pub relation_oid: u32,

    /// 1-based column number
    pub column_id: i16,
}

impl ColumnKey {
    pub fn new(relation_oid: u32, column_id: i16) -> Self {
        Self {
            relation_oid,
            column_id,
        }
    }
}

/// Base table column a value is ultimately read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnOrigin {
    pub table: String,
    pub column: String,
}

/// What is known about one table or view column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub nullability: ColNullability,

    /// Originating base table column, if the column could be traced to one
    pub origin: Option<ColumnOrigin>,
}

impl ColumnInfo {
    /// A column that could not be traced to any table column
    pub fn untraced() -> Self {
        Self {
            nullability: ColNullability::Opt,
            origin: None,
        }
    }

    /// Same origin, but never required
    pub fn optional(self) -> Self {
        Self {
            nullability: ColNullability::Opt,
            ..self
        }
    }
}

/// Errors raised while building or consulting a snapshot
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntrospectError {
    /// The engine reported a type the type table does not contain
    #[error("Unknown type oid {0}")]
    UnknownTypeOid(u32),

    #[error("Column {column_id} of table {table} is missing from the catalog")]
    MissingTableColumn { table: String, column_id: i16 },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Table columns and types of one schema epoch
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    pub(crate) columns: HashMap<ColumnKey, ColumnInfo>,
    pub(crate) relation_names: HashMap<u32, String>,
    types: HashMap<u32, SqlType>,
}

impl TableCatalog {
    pub fn column(&self, key: ColumnKey) -> Option<&ColumnInfo> {
        self.columns.get(&key)
    }

    pub fn relation_name(&self, oid: u32) -> Option<&str> {
        self.relation_names.get(&oid).map(String::as_str)
    }

    pub fn sql_type(&self, type_oid: u32) -> Result<&SqlType, IntrospectError> {
        self.types
            .get(&type_oid)
            .ok_or(IntrospectError::UnknownTypeOid(type_oid))
    }

    pub fn table_count(&self) -> usize {
        self.relation_names.len()
    }
}

/// Traced view columns for one live view set
#[derive(Debug, Clone, Default)]
pub struct ViewCatalog {
    pub(crate) columns: HashMap<ColumnKey, ColumnInfo>,
    pub(crate) relation_names: HashMap<u32, String>,
}

impl ViewCatalog {
    pub fn column(&self, key: ColumnKey) -> Option<&ColumnInfo> {
        self.columns.get(&key)
    }

    pub fn relation_name(&self, oid: u32) -> Option<&str> {
        self.relation_names.get(&oid).map(String::as_str)
    }

    pub fn view_count(&self) -> usize {
        self.relation_names.len()
    }
}

/// `table.column` pairs configured to carry their own host type
#[derive(Debug, Clone, Default)]
pub struct UniqueColumns {
    columns: HashSet<(String, String)>,
}

impl UniqueColumns {
    pub fn from_config(types: &[UniqueTableColumnType]) -> Self {
        Self {
            columns: types
                .iter()
                .map(|t| (t.table_name.clone(), t.column_name.clone()))
                .collect(),
        }
    }

    pub fn contains(&self, origin: &ColumnOrigin) -> bool {
        self.columns
            .contains(&(origin.table.clone(), origin.column.clone()))
    }
}

/// Catalog state used to type described result columns
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    tables: Arc<TableCatalog>,
    views: Arc<ViewCatalog>,
}

impl SchemaSnapshot {
    pub fn new(tables: TableCatalog, views: ViewCatalog) -> Self {
        Self {
            tables: Arc::new(tables),
            views: Arc::new(views),
        }
    }

    pub fn tables(&self) -> &TableCatalog {
        &self.tables
    }

    pub fn views(&self) -> &ViewCatalog {
        &self.views
    }

    /// Replace the view half, sharing the table half
    pub fn with_views(&self, views: ViewCatalog) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            views: Arc::new(views),
        }
    }

    pub fn relation_name(&self, oid: u32) -> Option<&str> {
        self.tables
            .relation_name(oid)
            .or_else(|| self.views.relation_name(oid))
    }

    /// What is known about the column a result column was read from
    pub fn column_info(&self, key: ColumnKey) -> Result<ColumnInfo, IntrospectError> {
        if key.relation_oid == 0 || key.column_id <= 0 {
            return Ok(ColumnInfo::untraced());
        }

        if let Some(table) = self.tables.relation_name(key.relation_oid) {
            return self
                .tables
                .column(key)
                .cloned()
                .ok_or_else(|| IntrospectError::MissingTableColumn {
                    table: table.to_string(),
                    column_id: key.column_id,
                });
        }

        Ok(self
            .views
            .column(key)
            .cloned()
            .unwrap_or_else(ColumnInfo::untraced))
    }

    /// Actual type of the described result column at `position`
    ///
    /// The column is required only when it is read unmodified from a not-null
    /// column through a range entry that is not on the nullable side of an
    /// outer join in `analysis`.
    pub fn column_type(
        &self,
        position: usize,
        column: &DescribedColumn,
        analysis: &OuterJoinAnalysis,
        unique: &UniqueColumns,
    ) -> Result<ColumnType, IntrospectError> {
        let info = self.column_info(ColumnKey::new(column.table_oid, column.column_id))?;

        let outer_joined = self
            .relation_name(column.table_oid)
            .is_some_and(|name| analysis.is_nullable(position, name));

        let nullability = if outer_joined {
            ColNullability::Opt
        } else {
            info.nullability
        };

        let sql_type = match &info.origin {
            Some(origin) if unique.contains(origin) => {
                SqlType::unique_column(&origin.table, &origin.column)
            }
            _ => self.tables.sql_type(column.type_oid)?.clone(),
        };

        Ok(ColumnType {
            nullability,
            sql_type,
        })
    }
}

/// Reads catalog metadata through a connection
pub struct SchemaIntrospector<'a, C: DbConnection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: DbConnection + ?Sized> SchemaIntrospector<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Load table column nullability and the type table
    pub async fn load_tables(&self) -> Result<TableCatalog, IntrospectError> {
        let mut catalog = TableCatalog::default();

        for row in self.conn.table_columns().await? {
            let nullability = if row.not_null {
                ColNullability::Req
            } else {
                ColNullability::Opt
            };

            catalog.columns.insert(
                ColumnKey::new(row.table_oid, row.column_id),
                ColumnInfo {
                    nullability,
                    origin: Some(ColumnOrigin {
                        table: row.table_name.clone(),
                        column: row.column_name,
                    }),
                },
            );
            catalog.relation_names.insert(row.table_oid, row.table_name);
        }

        for (oid, typname) in self.conn.type_names().await? {
            catalog.types.insert(oid, SqlType::from_engine_name(&typname));
        }

        tracing::debug!(
            tables = catalog.table_count(),
            columns = catalog.columns.len(),
            types = catalog.types.len(),
            "loaded table catalog"
        );

        Ok(catalog)
    }

    /// Load a complete snapshot
    pub async fn snapshot(&self) -> Result<SchemaSnapshot, IntrospectError> {
        let tables = self.load_tables().await?;
        let views = ColumnOriginTracer::trace(&tables, self.conn).await?;
        Ok(SchemaSnapshot::new(tables, views))
    }

    /// Retrace the views of `snapshot` against the current live view set
    pub async fn refresh_views(
        &self,
        snapshot: &SchemaSnapshot,
    ) -> Result<SchemaSnapshot, IntrospectError> {
        let views = ColumnOriginTracer::trace(snapshot.tables(), self.conn).await?;
        Ok(snapshot.with_views(views))
    }
}
