//! Query model exchanged with the source parser
//!
//! The parser discovers query call expressions in application source and
//! hands them over as plain data. Resolution into [`ResolvedQuery`] happens
//! in the engine once view names are known.

use serde::{Deserialize, Serialize};

use crate::diagnostic::{Diagnostic, SrcSpan};
use crate::schema::{ColumnTypes, SqlType};

/// Identity of a view: owning module plus local name
///
/// Distinct from the generated, content-addressed database name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedViewName {
    pub module: String,
    pub name: String,
}

impl QualifiedViewName {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for QualifiedViewName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.module, self.name)
    }
}

/// Maps character offsets in generated SQL back to offsets in a source file
///
/// Each entry is `(generated_offset, source_offset)`; entries are pushed in
/// increasing generated order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    entries: Vec<(usize, usize)>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, generated_offset: usize, source_offset: usize) {
        self.entries.push((generated_offset, source_offset));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source offset for a 0-based generated offset
    pub fn resolve(&self, generated_offset: usize) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .find(|(generated, _)| *generated <= generated_offset)
            .map(|(generated, source)| source + (generated_offset - generated))
    }
}

/// Declared result shape of a query call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "columns", rename_all = "snake_case")]
pub enum TypeArgument {
    /// A declared column map
    Typed(ColumnTypes),

    /// Caller opted out of type checking
    Untyped,

    /// No type argument at all; same as an empty map
    Omitted,
}

/// One piece of a query call expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryFragment {
    /// Literal SQL text starting at `source_pos` (0-based char offset) in the file
    Literal { text: String, source_pos: usize },

    /// A bound parameter of the given semantic type
    Param { sql_type: SqlType },

    /// A reference to a view
    ViewRef(QualifiedViewName),
}

/// A query call expression as discovered in source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCallExpression {
    pub file_name: String,

    #[serde(default)]
    pub file_contents: String,

    pub type_argument: TypeArgument,

    /// Where the type argument sits (or where it would go)
    pub type_argument_span: SrcSpan,

    pub fragments: Vec<QueryFragment>,

    /// Problems the parser already found in this expression
    #[serde(default)]
    pub errors: Vec<Diagnostic>,
}

/// Expected result shape after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedColumns {
    Typed(ColumnTypes),

    /// Skip the comparison
    Untyped,
}

impl ExpectedColumns {
    /// Fingerprint component
    ///
    /// The untyped marker starts with a NUL so it can never equal the
    /// canonical string of a declared map, including the empty one.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Typed(types) => types.canonical(),
            Self::Untyped => "\0untyped".to_string(),
        }
    }
}

impl From<&TypeArgument> for ExpectedColumns {
    fn from(arg: &TypeArgument) -> Self {
        match arg {
            TypeArgument::Typed(types) => Self::Typed(types.clone()),
            TypeArgument::Untyped => Self::Untyped,
            TypeArgument::Omitted => Self::Typed(ColumnTypes::new()),
        }
    }
}

/// A query with all references and parameters substituted
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub file_name: String,
    pub file_contents: String,

    /// SQL sent to the database
    pub text: String,

    pub source_map: SourceMap,

    pub expected: ExpectedColumns,

    pub type_argument_span: SrcSpan,

    /// Fallback location for errors without a position
    pub source_start: SrcSpan,

    /// Parser-reported problems carried along with the query
    pub errors: Vec<Diagnostic>,
}

impl ResolvedQuery {
    /// Cache key: substituted text followed by the expected shape
    pub fn fingerprint(&self) -> String {
        format!("{}{}", self.text, self.expected.fingerprint())
    }

    /// Span in the source file for a 1-based engine position in `text`
    pub fn span_for_position(&self, position: Option<usize>) -> SrcSpan {
        position
            .and_then(|p| p.checked_sub(1))
            .and_then(|offset| self.source_map.resolve(offset))
            .map(|offset| SrcSpan::at_offset(&self.file_contents, offset))
            .unwrap_or(self.source_start)
    }
}
