//! Parser output consumed by a check pass

use serde::{Deserialize, Serialize};
use sqlcheck_core::QueryCallExpression;
use sqlcheck_views::ViewSource;
use std::path::Path;

/// Every view and query discovered in the sources, as JSON
///
/// ```json
/// { "views": [ ... ], "queries": [ ... ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub views: Vec<ViewSource>,

    #[serde(default)]
    pub queries: Vec<QueryCallExpression>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(ManifestError::Parse)
    }

    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let json = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest: {0}")]
    Parse(serde_json::Error),
}
