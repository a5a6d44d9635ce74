//! Check pass orchestration
//!
//! A [`SqlChecker`] owns the connection and all state carried between
//! passes: the view graph, the schema sync state, the schema snapshot and
//! the query answer cache. Each call to [`SqlChecker::check`] runs one pass:
//!
//! ```text
//! Idle -> SyncingSchema -> ReconcilingViews -> ValidatingQueries -> Idle
//! ```
//!
//! A failing migration ends the pass right after `SyncingSchema` with that
//! single diagnostic.

use crate::manifest::Manifest;
use crate::query_resolver::resolve_query;
use crate::query_validator::{answer_diagnostic, QueryAnswer, QueryValidator, ValidateError};
use crate::schema_sync::{SchemaSyncManager, SchemaSyncOutcome, SyncError};
use sqlcheck_catalog::{DbConnection, IntrospectError, SchemaIntrospector, SchemaSnapshot};
use sqlcheck_core::{Config, ConfigError, Diagnostic};
use sqlcheck_incremental::{CacheStats, ValidationCache};
use sqlcheck_views::{ViewDefinition, ViewError, ViewGraph};

/// Stage of the current pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    SyncingSchema,
    ReconcilingViews,
    ValidatingQueries,
}

impl std::fmt::Display for PassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SyncingSchema => write!(f, "syncing schema"),
            Self::ReconcilingViews => write!(f, "reconciling views"),
            Self::ValidatingQueries => write!(f, "validating queries"),
        }
    }
}

/// Errors that abort a pass
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Introspect(#[from] IntrospectError),

    #[error(transparent)]
    Validate(#[from] ValidateError),
}

/// Validates snapshots of views and queries against one connection
pub struct SqlChecker<C: DbConnection> {
    conn: C,
    state: PassState,
    graph: ViewGraph,
    sync: SchemaSyncManager,
    snapshot: Option<SchemaSnapshot>,
    cache: ValidationCache<QueryAnswer>,
    validator: QueryValidator,
}

impl<C: DbConnection> SqlChecker<C> {
    pub fn new(conn: C, config: &Config) -> Result<Self, CheckError> {
        let pattern = config.migration_regex()?;

        Ok(Self {
            conn,
            state: PassState::Idle,
            graph: ViewGraph::new().with_name_hints(config.view_name_hints),
            sync: SchemaSyncManager::new(config.migrations_path(), pattern),
            snapshot: None,
            cache: ValidationCache::new(),
            validator: QueryValidator::new(config),
        })
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    /// Statistics of the last query validation stage
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Generated names of the views currently in the database, in creation order
    pub fn live_views(&self) -> Vec<&str> {
        self.sync
            .live_views()
            .iter()
            .map(|view| view.view_name.as_str())
            .collect()
    }

    pub fn graph(&self) -> &ViewGraph {
        &self.graph
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Give the connection back so it can be closed
    pub fn into_connection(self) -> C {
        self.conn
    }

    /// Run one pass over `manifest`
    ///
    /// Per-query and per-view problems are returned as diagnostics; only
    /// fatal problems are errors.
    pub async fn check(&mut self, manifest: &Manifest) -> Result<Vec<Diagnostic>, CheckError> {
        let result = self.run_pass(manifest).await;
        self.transition(PassState::Idle);

        if let Ok(diagnostics) = &result {
            tracing::info!(
                diagnostics = diagnostics.len(),
                views = manifest.views.len(),
                queries = manifest.queries.len(),
                "check pass finished"
            );
        }

        result
    }

    async fn run_pass(&mut self, manifest: &Manifest) -> Result<Vec<Diagnostic>, CheckError> {
        self.transition(PassState::SyncingSchema);

        match self.sync.sync_schema(&self.conn).await? {
            SchemaSyncOutcome::Unchanged => {}
            SchemaSyncOutcome::Replayed => {
                self.cache.clear();
                self.snapshot = None;
            }
            SchemaSyncOutcome::Failed(diagnostic) => {
                self.cache.clear();
                self.snapshot = None;
                return Ok(vec![diagnostic]);
            }
        }

        self.transition(PassState::ReconcilingViews);

        let definitions = manifest
            .views
            .iter()
            .cloned()
            .map(ViewDefinition::from_source)
            .collect();
        let touched = self.graph.sync(definitions);
        if !touched.is_empty() {
            tracing::debug!(views = touched.len(), "view definitions changed");
        }

        let creates = self.graph.resolve()?;
        let reconcile = self.sync.reconcile_views(&self.conn, creates).await?;

        let introspector = SchemaIntrospector::new(&self.conn);
        let snapshot = match self.snapshot.take() {
            None => introspector.snapshot().await?,
            Some(snapshot) if reconcile.changed() => introspector.refresh_views(&snapshot).await?,
            Some(snapshot) => snapshot,
        };
        self.snapshot = Some(snapshot.clone());

        let mut diagnostics = reconcile.diagnostics;

        self.transition(PassState::ValidatingQueries);

        let mut pass = self.cache.begin_pass();

        for expr in &manifest.queries {
            let query = match resolve_query(expr, &self.graph) {
                Ok(query) => query,
                Err(errors) => {
                    diagnostics.extend(errors);
                    continue;
                }
            };

            // Parser-reported problems do not stop the query from being described
            diagnostics.extend(query.errors.iter().cloned());

            let fingerprint = query.fingerprint();
            let answer = match pass.lookup(&fingerprint) {
                Some(answer) => answer,
                None => self.validator.validate(&self.conn, &snapshot, &query).await?,
            };

            diagnostics.extend(answer_diagnostic(&query, &answer));
            pass.record(fingerprint, answer);
        }

        self.cache = pass.finish();

        Ok(diagnostics)
    }

    fn transition(&mut self, next: PassState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "check pass state");
            self.state = next;
        }
    }
}
