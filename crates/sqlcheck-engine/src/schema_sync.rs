//! Schema and view synchronization
//!
//! Keeps the check database in step with two sources:
//! - the migrations directory, tracked by a content hash; any drift drops
//!   everything and replays all migrations
//! - the resolved view library; only views whose generated name appeared or
//!   disappeared are created or dropped
//!
//! Generated view names are content-addressed, so a view whose name did not
//! change is structurally unchanged and keeps its previous answer.

use regex::Regex;
use sha2::{Digest, Sha256};
use sqlcheck_catalog::{DbConnection, DbError};
use sqlcheck_core::{Diagnostic, DiagnosticCode, SrcSpan};
use sqlcheck_incremental::ValidationCache;
use sqlcheck_views::SqlCreateView;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const RESET_SCHEMA: &str = "DROP SCHEMA public CASCADE; CREATE SCHEMA public";

/// Fatal synchronization errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list migrations: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A migration file selected by the configured pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, used for ordering and hashing
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

/// Read the migrations in `dir` matching `pattern`, sorted by file name
///
/// Only the top level of `dir` is considered.
pub fn load_migrations(dir: &Path, pattern: &Regex) -> Result<Vec<MigrationFile>, SyncError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if !pattern.is_match(&name) {
            continue;
        }

        let contents = std::fs::read_to_string(entry.path()).map_err(|source| SyncError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;

        files.push(MigrationFile {
            name,
            path: entry.path().to_path_buf(),
            contents,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Content hash over file names and contents, in order
pub fn migrations_hash(files: &[MigrationFile]) -> String {
    let mut hasher = Sha256::new();

    for file in files {
        let content_hash = Sha256::digest(file.contents.as_bytes());
        hasher.update(file.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(content_hash);
    }

    hex::encode(hasher.finalize())
}

/// Result of bringing the tables in line with the migrations
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSyncOutcome {
    /// Hash unchanged, nothing was executed
    Unchanged,

    /// Everything was dropped and all migrations replayed
    Replayed,

    /// A migration failed; the schema is in an unknown state
    Failed(Diagnostic),
}

/// Stored outcome of creating one view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewAnswer {
    Created,
    CreateError(Diagnostic),
}

/// Result of reconciling the live views
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewReconcile {
    pub created: Vec<String>,
    pub dropped: Vec<String>,

    /// Creation errors of the current views, in creation order
    pub diagnostics: Vec<Diagnostic>,
}

impl ViewReconcile {
    /// Whether the live view set changed
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.dropped.is_empty()
    }
}

/// Tracks what the check database currently contains
pub struct SchemaSyncManager {
    migrations_dir: PathBuf,
    pattern: Regex,

    /// Hash of the replayed migrations; `None` when unknown
    schema_hash: Option<String>,

    /// Views created in the database, in creation order
    live_views: Vec<SqlCreateView>,

    view_answers: ValidationCache<ViewAnswer>,
}

impl SchemaSyncManager {
    pub fn new(migrations_dir: impl Into<PathBuf>, pattern: Regex) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            pattern,
            schema_hash: None,
            live_views: Vec::new(),
            view_answers: ValidationCache::new(),
        }
    }

    pub fn schema_hash(&self) -> Option<&str> {
        self.schema_hash.as_deref()
    }

    pub fn live_views(&self) -> &[SqlCreateView] {
        &self.live_views
    }

    /// Replay all migrations if their hash differs from the applied one
    pub async fn sync_schema<C: DbConnection + ?Sized>(
        &mut self,
        conn: &C,
    ) -> Result<SchemaSyncOutcome, SyncError> {
        let files = load_migrations(&self.migrations_dir, &self.pattern)?;
        let hash = migrations_hash(&files);

        if self.schema_hash.as_deref() == Some(hash.as_str()) {
            tracing::debug!(hash = %hash, "migrations unchanged");
            return Ok(SchemaSyncOutcome::Unchanged);
        }

        tracing::info!(
            migrations = files.len(),
            dir = %self.migrations_dir.display(),
            "migrations changed, replaying schema"
        );

        self.schema_hash = None;
        self.drop_live_views(conn).await?;
        conn.execute(RESET_SCHEMA).await?;

        for file in &files {
            tracing::info!(migration = %file.name, "applying migration");

            match conn.execute(&file.contents).await {
                Ok(()) => {}
                Err(DbError::Sql(err)) => {
                    tracing::warn!(migration = %file.name, "migration failed: {}", err);

                    let span = err
                        .position
                        .map(|p| SrcSpan::at_position(&file.contents, p))
                        .unwrap_or(SrcSpan::File);

                    return Ok(SchemaSyncOutcome::Failed(Diagnostic::from_postgres_error(
                        DiagnosticCode::MigrationError,
                        file.path.display().to_string(),
                        &file.contents,
                        &err,
                        span,
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.schema_hash = Some(hash);
        Ok(SchemaSyncOutcome::Replayed)
    }

    async fn drop_live_views<C: DbConnection + ?Sized>(&mut self, conn: &C) -> Result<(), SyncError> {
        for view in self.live_views.iter().rev() {
            tracing::debug!(view = %view.view_name, "dropping view");
            conn.execute(&view.drop_statement()).await?;
        }

        self.live_views.clear();
        self.view_answers.clear();
        Ok(())
    }

    /// Create and drop views so the database holds exactly `views`
    ///
    /// `views` must be in creation order. Views with the same generated name
    /// are created once.
    pub async fn reconcile_views<C: DbConnection + ?Sized>(
        &mut self,
        conn: &C,
        views: Vec<SqlCreateView>,
    ) -> Result<ViewReconcile, SyncError> {
        let mut seen = HashSet::new();
        let views: Vec<SqlCreateView> = views
            .into_iter()
            .filter(|view| seen.insert(view.view_name.clone()))
            .collect();

        let old_names: HashSet<&str> = self.live_views.iter().map(|v| v.view_name.as_str()).collect();
        let new_names: HashSet<&str> = views.iter().map(|v| v.view_name.as_str()).collect();

        let mut outcome = ViewReconcile::default();

        for view in self.live_views.iter().rev() {
            if new_names.contains(view.view_name.as_str()) {
                continue;
            }

            tracing::info!(view = %view.view_name, name = %view.qualified_name, "dropping view");
            conn.execute(&view.drop_statement()).await?;
            outcome.dropped.push(view.view_name.clone());
        }

        let mut pass = self.view_answers.begin_pass();

        for view in &views {
            if old_names.contains(view.view_name.as_str()) && pass.carry_over(&view.view_name) {
                continue;
            }

            tracing::info!(view = %view.view_name, name = %view.qualified_name, "creating view");

            let answer = match conn.execute(&view.create_statement()).await {
                Ok(()) => ViewAnswer::Created,
                Err(DbError::Sql(err)) => {
                    let err = err.without_prefix(view.statement_prefix().chars().count());
                    tracing::warn!(view = %view.view_name, "view creation failed: {}", err);

                    ViewAnswer::CreateError(Diagnostic::from_postgres_error(
                        DiagnosticCode::ViewCreateError,
                        &view.file_name,
                        &view.file_contents,
                        &err,
                        view.span_for_position(err.position),
                    ))
                }
                Err(err) => return Err(err.into()),
            };

            pass.record(view.view_name.clone(), answer);
            outcome.created.push(view.view_name.clone());
        }

        let answers = pass.finish();

        for view in &views {
            if let Some(ViewAnswer::CreateError(diagnostic)) = answers.get(&view.view_name) {
                outcome.diagnostics.push(diagnostic.clone());
            }
        }

        self.view_answers = answers;
        self.live_views = views;

        Ok(outcome)
    }
}
