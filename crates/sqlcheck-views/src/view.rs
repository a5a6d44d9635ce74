//! View definitions and content-addressed naming

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sqlcheck_core::{QualifiedViewName, SourceMap, SrcSpan};

/// Longest snake_cased hint kept in a generated name
const MAX_HINT_LEN: usize = 40;

/// Number of hex characters of the content hash kept in a generated name
const HASH_LEN: usize = 12;

/// One piece of a view definition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewFragment {
    Literal(String),
    Reference(QualifiedViewName),
}

/// View fragment as produced by the source parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewSourceFragment {
    /// Literal SQL starting at `source_pos` (0-based char offset) in the file
    Literal { text: String, source_pos: usize },

    Reference(QualifiedViewName),
}

/// A view as discovered in source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSource {
    #[serde(flatten)]
    pub qualified_name: QualifiedViewName,

    pub file_name: String,

    #[serde(default)]
    pub file_contents: String,

    /// Human-readable hint, usually the variable the view was assigned to
    #[serde(default)]
    pub hint: Option<String>,

    pub fragments: Vec<ViewSourceFragment>,
}

/// Working state of a fragment during resolution
#[derive(Debug, Clone)]
enum WorkingFragment {
    Text { text: String, source_pos: Option<usize> },
    Pending(QualifiedViewName),
}

/// A named SQL view fragment
///
/// Equality only looks at the initial fragment sequence. The hint, file
/// metadata and fragment positions never take part in identity.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    qualified_name: QualifiedViewName,
    file_name: String,
    file_contents: String,
    hint: Option<String>,

    fragments: Vec<ViewFragment>,

    /// Source offsets parallel to `fragments` (None for references)
    fragment_offsets: Vec<Option<usize>>,

    working: Vec<WorkingFragment>,
    generated_name: Option<String>,
}

impl PartialEq for ViewDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.fragments == other.fragments
    }
}

impl Eq for ViewDefinition {}

impl ViewDefinition {
    /// Build a definition without source metadata
    pub fn new(qualified_name: QualifiedViewName, fragments: Vec<ViewFragment>) -> Self {
        let fragment_offsets = vec![None; fragments.len()];
        let mut def = Self {
            qualified_name,
            file_name: String::new(),
            file_contents: String::new(),
            hint: None,
            fragments,
            fragment_offsets,
            working: Vec::new(),
            generated_name: None,
        };
        def.reset();
        def
    }

    pub fn from_source(source: ViewSource) -> Self {
        let mut fragments = Vec::with_capacity(source.fragments.len());
        let mut fragment_offsets = Vec::with_capacity(source.fragments.len());

        for fragment in source.fragments {
            match fragment {
                ViewSourceFragment::Literal { text, source_pos } => {
                    fragments.push(ViewFragment::Literal(text));
                    fragment_offsets.push(Some(source_pos));
                }
                ViewSourceFragment::Reference(name) => {
                    fragments.push(ViewFragment::Reference(name));
                    fragment_offsets.push(None);
                }
            }
        }

        let mut def = Self {
            qualified_name: source.qualified_name,
            file_name: source.file_name,
            file_contents: source.file_contents,
            hint: source.hint,
            fragments,
            fragment_offsets,
            working: Vec::new(),
            generated_name: None,
        };
        def.reset();
        def
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn qualified_name(&self) -> &QualifiedViewName {
        &self.qualified_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_contents(&self) -> &str {
        &self.file_contents
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn fragments(&self) -> &[ViewFragment] {
        &self.fragments
    }

    /// Views referenced by the initial fragments, in order of appearance
    pub fn dependencies(&self) -> Vec<&QualifiedViewName> {
        let mut deps: Vec<&QualifiedViewName> = Vec::new();
        for fragment in &self.fragments {
            if let ViewFragment::Reference(name) = fragment {
                if !deps.contains(&name) {
                    deps.push(name);
                }
            }
        }
        deps
    }

    /// Cached generated name, if resolved since the last reset
    pub fn generated_name(&self) -> Option<&str> {
        self.generated_name.as_deref()
    }

    /// Restore the working fragments to the unsubstituted form
    pub fn reset(&mut self) {
        self.working = self
            .fragments
            .iter()
            .zip(&self.fragment_offsets)
            .map(|(fragment, offset)| match fragment {
                ViewFragment::Literal(text) => WorkingFragment::Text {
                    text: text.clone(),
                    source_pos: *offset,
                },
                ViewFragment::Reference(name) => WorkingFragment::Pending(name.clone()),
            })
            .collect();
        self.generated_name = None;
    }

    /// Take file metadata and literal positions from an equal definition,
    /// keeping substitutions and the generated name
    pub(crate) fn refresh_metadata(&mut self, other: ViewDefinition) {
        self.file_name = other.file_name;
        self.file_contents = other.file_contents;
        self.hint = other.hint;
        self.fragment_offsets = other.fragment_offsets;

        for (fragment, offset) in self.working.iter_mut().zip(&self.fragment_offsets) {
            if let (WorkingFragment::Text { source_pos, .. }, Some(pos)) = (fragment, offset) {
                *source_pos = Some(*pos);
            }
        }
    }

    /// References not yet substituted
    pub(crate) fn pending_dependencies(&self) -> Vec<QualifiedViewName> {
        let mut pending: Vec<QualifiedViewName> = Vec::new();
        for fragment in &self.working {
            if let WorkingFragment::Pending(name) = fragment {
                if !pending.contains(name) {
                    pending.push(name.clone());
                }
            }
        }
        pending
    }

    /// Replace every pending reference to `dependency` with its quoted name
    pub(crate) fn substitute(&mut self, dependency: &QualifiedViewName, view_name: &str) {
        for fragment in &mut self.working {
            if matches!(&*fragment, WorkingFragment::Pending(name) if name == dependency) {
                *fragment = WorkingFragment::Text {
                    text: format!("\"{}\"", view_name),
                    source_pos: None,
                };
            }
        }
    }

    /// Substituted SQL text and its source map
    ///
    /// Returns None while references are still pending.
    pub fn resolved_query(&self) -> Option<(String, SourceMap)> {
        let mut text = String::new();
        let mut offset = 0;
        let mut source_map = SourceMap::new();

        for fragment in &self.working {
            match fragment {
                WorkingFragment::Text { text: chunk, source_pos } => {
                    if let Some(pos) = source_pos {
                        source_map.push(offset, *pos);
                    }
                    offset += chunk.chars().count();
                    text.push_str(chunk);
                }
                WorkingFragment::Pending(_) => return None,
            }
        }

        Some((text, source_map))
    }

    /// Compute and cache the generated name from the substituted text
    pub(crate) fn compute_generated_name(&mut self, use_hint: bool) -> Option<String> {
        let (text, _) = self.resolved_query()?;
        let hint = if use_hint { self.hint.as_deref() } else { None };
        let name = generated_view_name(hint, &text);
        self.generated_name = Some(name.clone());
        Some(name)
    }

    /// Location used when an error carries no position
    pub fn source_start(&self) -> SrcSpan {
        match self.fragment_offsets.iter().flatten().next() {
            Some(pos) => SrcSpan::first_token_after(&self.file_contents, *pos),
            None => SrcSpan::File,
        }
    }
}

/// Content-addressed database name for a view
///
/// `view_<hash12>`, or `view_<snake_hint>_<hash12>` when a hint is given.
pub fn generated_view_name(hint: Option<&str>, sql: &str) -> String {
    let digest = hex::encode(Sha256::digest(sql.as_bytes()));
    let hash = &digest[..HASH_LEN];

    match hint.map(snake_case).filter(|h| !h.is_empty()) {
        Some(hint) => format!("view_{}_{}", hint, hash),
        None => format!("view_{}", hash),
    }
}

/// `activePeopleV2` -> `active_people_v2`
fn snake_case(s: &str) -> String {
    let mut out = String::new();
    let mut prev_lower_or_digit = false;

    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower_or_digit {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower_or_digit = false;
        }
    }

    let trimmed = out.trim_matches('_');
    trimmed.chars().take(MAX_HINT_LEN).collect::<String>().trim_end_matches('_').to_string()
}
