//! report.json written by `sqlcheck check`
//!
//! The layout is versioned: bump [`REPORT_VERSION`] whenever a field is
//! renamed or removed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::diagnostic::{Diagnostic, DiagnosticCode};

pub const REPORT_VERSION: u32 = 1;

/// Counts for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub errors: usize,

    /// Error count per diagnostic code
    pub by_code: BTreeMap<DiagnosticCode, usize>,

    pub queries_checked: usize,
    pub views_checked: usize,
}

/// Outcome of one check pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub version: u32,

    /// When the pass finished (RFC 3339, UTC)
    pub generated_at: String,

    pub summary: ReportSummary,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let mut by_code = BTreeMap::new();
        for diagnostic in &diagnostics {
            *by_code.entry(diagnostic.code).or_insert(0) += 1;
        }

        Self {
            version: REPORT_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary {
                errors: diagnostics.len(),
                by_code,
                queries_checked: 0,
                views_checked: 0,
            },
            diagnostics,
        }
    }

    pub fn with_counts(mut self, queries_checked: usize, views_checked: usize) -> Self {
        self.summary.queries_checked = queries_checked;
        self.summary.views_checked = views_checked;
        self
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON, replacing `path`
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}
