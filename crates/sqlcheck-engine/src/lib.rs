//! sqlcheck engine
//!
//! This crate implements one check pass end to end:
//! - Query resolution (view references and parameters substituted)
//! - Query validation through the describe protocol
//! - Migration drift detection and view reconciliation
//! - The [`SqlChecker`] orchestrator tying the stages together

pub mod checker;
pub mod manifest;
pub mod query_resolver;
pub mod query_validator;
pub mod schema_sync;

pub use checker::{CheckError, PassState, SqlChecker};
pub use manifest::{Manifest, ManifestError};
pub use query_resolver::resolve_query;
pub use query_validator::{answer_diagnostic, QueryAnswer, QueryValidator, ValidateError};
pub use schema_sync::{
    load_migrations, migrations_hash, MigrationFile, SchemaSyncManager, SchemaSyncOutcome,
    SyncError, ViewAnswer, ViewReconcile,
};
