//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};
use crate::pg_error::PostgreSqlError;

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Query validation (1xxx)
    /// The database rejected the query while describing it
    SqlDescribeError,

    /// The query returns two or more columns with the same name
    DuplicateColumnNames,

    /// The declared result columns do not match the described ones
    WrongColumnTypes,

    // Schema sync (2xxx)
    /// A migration file failed to replay
    MigrationError,

    /// A view failed to be created
    ViewCreateError,

    // Query resolution (3xxx)
    /// A query references a view that is unknown or failed to resolve
    ViewReferenceNotFound,

    /// The query call expression itself is malformed: reported by the source
    /// parser, or a query whose SQL text is blank
    InvalidQuery,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlDescribeError => "SQL_DESCRIBE_ERROR",
            Self::DuplicateColumnNames => "DUPLICATE_COLUMN_NAMES",
            Self::WrongColumnTypes => "WRONG_COLUMN_TYPES",
            Self::MigrationError => "MIGRATION_ERROR",
            Self::ViewCreateError => "VIEW_CREATE_ERROR",
            Self::ViewReferenceNotFound => "VIEW_REFERENCE_NOT_FOUND",
            Self::InvalidQuery => "INVALID_QUERY",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Span inside a source file (lines and columns are 1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SrcSpan {
    LineAndColRange {
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    },

    LineAndCol {
        line: usize,
        col: usize,
    },

    /// The file as a whole
    File,
}

impl SrcSpan {
    /// Point span for a 0-based character offset into `text`
    ///
    /// Offsets past the end of the text are clamped to the end.
    pub fn at_offset(text: &str, offset: usize) -> Self {
        let mut line = 1;
        let mut col = 1;

        for ch in text.chars().take(offset) {
            if ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }

        Self::LineAndCol { line, col }
    }

    /// Point span for a 1-based character position, as reported by PostgreSQL
    pub fn at_position(text: &str, position: usize) -> Self {
        Self::at_offset(text, position.saturating_sub(1))
    }

    /// Span pointing at the first non-whitespace character at or after `offset`
    pub fn first_token_after(text: &str, offset: usize) -> Self {
        let skipped = text
            .chars()
            .skip(offset)
            .take_while(|c| c.is_whitespace())
            .count();

        Self::at_offset(text, offset + skipped)
    }

    /// Short location string `(line,col)` / `(l1,c1,l2,c2)` / `(1)`
    pub fn location_string(&self) -> String {
        match self {
            Self::LineAndColRange { start_line, start_col, end_line, end_col } => {
                format!("({},{},{},{})", start_line, start_col, end_line, end_col)
            }
            Self::LineAndCol { line, col } => format!("({},{})", line, col),
            Self::File => "(1)".to_string(),
        }
    }
}

/// A diagnostic message with structured metadata
///
/// Every diagnostic is an error: the pass fails when any is reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Path of the file the diagnostic points into
    pub file_name: String,

    /// Full text of that file, for context rendering
    #[serde(default, skip_serializing)]
    pub file_contents: String,

    /// Where in the file
    pub span: SrcSpan,

    /// One or more message lines
    pub messages: Vec<String>,

    /// Trailing text shown after the messages (used for "Fix it to:" suggestions)
    pub epilogue: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(
        code: DiagnosticCode,
        file_name: impl Into<String>,
        file_contents: impl Into<String>,
        span: SrcSpan,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            file_name: file_name.into(),
            file_contents: file_contents.into(),
            span,
            messages: vec![message.into()],
            epilogue: None,
        }
    }

    /// Diagnostic for an error reported by PostgreSQL
    ///
    /// The first message line is the engine message; detail and hint follow
    /// on their own lines when present.
    pub fn from_postgres_error(
        code: DiagnosticCode,
        file_name: impl Into<String>,
        file_contents: impl Into<String>,
        error: &PostgreSqlError,
        span: SrcSpan,
    ) -> Self {
        let mut diag = Self::new(code, file_name, file_contents, span, error.message.clone());

        if let Some(detail) = &error.detail {
            diag.messages.push(format!("DETAIL: {}", detail));
        }
        if let Some(hint) = &error.hint {
            diag.messages.push(format!("HINT: {}", hint));
        }

        diag
    }

    /// Append another message line
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Set the epilogue
    pub fn with_epilogue(mut self, epilogue: impl Into<String>) -> Self {
        self.epilogue = Some(epilogue.into());
        self
    }
}
