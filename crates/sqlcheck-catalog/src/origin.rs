//! View column nullability tracing
//!
//! PostgreSQL does not record whether a view column can be null. For every
//! live view the tracer describes its definition (as printed by
//! `pg_get_viewdef`), which attributes each output column to a relation
//! column, and follows that attribution through nested views until it
//! reaches a table column.
//!
//! A view column is required only when it reaches a not-null table column
//! and no view on the way reads it through the nullable side of an outer join.
//! Literals, expressions, unparsable definitions and cycles all yield
//! optional columns.

use crate::connection::{DbConnection, DbError, DescribedColumn};
use crate::introspect::{ColumnInfo, ColumnKey, IntrospectError, TableCatalog, ViewCatalog};
use sqlcheck_sql::OuterJoinAnalysis;
use std::collections::{HashMap, HashSet};

/// A live view and what describing its definition returned
struct DescribedView {
    name: String,
    columns: Vec<DescribedColumn>,

    /// `None` when the definition could not be parsed
    analysis: Option<OuterJoinAnalysis>,
}

/// Memoized walk over view definitions
pub struct ColumnOriginTracer<'a> {
    tables: &'a TableCatalog,
    views: HashMap<u32, DescribedView>,
    traced: HashMap<u32, Vec<ColumnInfo>>,
    visiting: HashSet<u32>,
}

impl<'a> ColumnOriginTracer<'a> {
    /// Trace every view currently live on `conn`
    ///
    /// A view the engine refuses to describe is skipped with a warning and
    /// its columns fall back to optional. Transport errors propagate.
    pub async fn trace<C: DbConnection + ?Sized>(
        tables: &'a TableCatalog,
        conn: &C,
    ) -> Result<ViewCatalog, IntrospectError> {
        let mut views = HashMap::new();

        for row in conn.view_definitions().await? {
            let columns = match conn.describe(&row.definition).await {
                Ok(columns) => columns.unwrap_or_default(),
                Err(DbError::Sql(err)) => {
                    tracing::warn!(view = %row.view_name, "could not describe view definition: {}", err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let analysis = match OuterJoinAnalysis::from_sql(&row.definition) {
                Ok(analysis) => Some(analysis),
                Err(err) => {
                    tracing::debug!(view = %row.view_name, "view definition not parsed: {}", err);
                    None
                }
            };

            views.insert(
                row.view_oid,
                DescribedView {
                    name: row.view_name,
                    columns,
                    analysis,
                },
            );
        }

        let mut tracer = Self {
            tables,
            views,
            traced: HashMap::new(),
            visiting: HashSet::new(),
        };

        Ok(tracer.build_catalog())
    }

    fn build_catalog(&mut self) -> ViewCatalog {
        let mut oids: Vec<u32> = self.views.keys().copied().collect();
        oids.sort_unstable();

        let mut catalog = ViewCatalog::default();
        for oid in oids {
            for (i, info) in self.view_columns(oid).into_iter().enumerate() {
                catalog.columns.insert(ColumnKey::new(oid, i as i16 + 1), info);
            }
            if let Some(view) = self.views.get(&oid) {
                catalog.relation_names.insert(oid, view.name.clone());
            }
        }

        tracing::debug!(
            views = catalog.relation_names.len(),
            columns = catalog.columns.len(),
            "traced view columns"
        );

        catalog
    }

    fn view_columns(&mut self, view_oid: u32) -> Vec<ColumnInfo> {
        if let Some(traced) = self.traced.get(&view_oid) {
            return traced.clone();
        }

        // A view reached again while tracing itself; leave it untraced
        if !self.visiting.insert(view_oid) {
            return Vec::new();
        }

        let (columns, analysis) = match self.views.get(&view_oid) {
            Some(view) => (view.columns.clone(), view.analysis.clone()),
            None => (Vec::new(), None),
        };

        let infos: Vec<ColumnInfo> = columns
            .iter()
            .enumerate()
            .map(|(position, column)| self.column_info(position, column, analysis.as_ref()))
            .collect();

        self.visiting.remove(&view_oid);
        self.traced.insert(view_oid, infos.clone());
        infos
    }

    fn column_info(
        &mut self,
        position: usize,
        column: &DescribedColumn,
        analysis: Option<&OuterJoinAnalysis>,
    ) -> ColumnInfo {
        let source = self.source_info(column.table_oid, column.column_id);

        let Some(analysis) = analysis else {
            return source.optional();
        };

        let outer_joined = self
            .relation_name(column.table_oid)
            .is_some_and(|name| analysis.is_nullable(position, name));

        if outer_joined {
            source.optional()
        } else {
            source
        }
    }

    fn source_info(&mut self, relation_oid: u32, column_id: i16) -> ColumnInfo {
        if relation_oid == 0 || column_id <= 0 {
            return ColumnInfo::untraced();
        }

        if let Some(info) = self.tables.column(ColumnKey::new(relation_oid, column_id)) {
            return info.clone();
        }

        if self.views.contains_key(&relation_oid) {
            return self
                .view_columns(relation_oid)
                .get(column_id as usize - 1)
                .cloned()
                .unwrap_or_else(ColumnInfo::untraced);
        }

        ColumnInfo::untraced()
    }

    fn relation_name(&self, oid: u32) -> Option<&str> {
        self.tables
            .relation_name(oid)
            .or_else(|| self.views.get(&oid).map(|view| view.name.as_str()))
    }
}
