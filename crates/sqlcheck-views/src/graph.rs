//! View dependency graph
//!
//! Resolves references between views into generated names and produces the
//! order in which views must be created. Definitions keep their working
//! substitutions between passes; any change resets the changed view and
//! everything downstream of it.

use std::collections::{BTreeMap, HashSet};

use sqlcheck_core::{QualifiedViewName, SourceMap, SrcSpan};
use crate::view::ViewDefinition;

/// Fatal view library errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("View depends on itself: \"{0}\"")]
    SelfDependency(QualifiedViewName),

    #[error("Missing dependency in view \"{view}\": \"{dependency}\"")]
    MissingDependency {
        view: QualifiedViewName,
        dependency: QualifiedViewName,
    },

    #[error("View \"{0}\" has unresolved references")]
    Unresolved(QualifiedViewName),

    #[error("Internal view graph error: {0}")]
    Internal(String),
}

/// A resolved view ready to be created in the database
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCreateView {
    pub qualified_name: QualifiedViewName,

    /// Generated database name
    pub view_name: String,

    /// Fully substituted view body
    pub create_query: String,

    pub source_map: SourceMap,

    pub file_name: String,
    pub file_contents: String,

    /// Fallback location for errors without a position
    pub source_start: SrcSpan,
}

impl SqlCreateView {
    /// Statement prefix placed before `create_query`
    pub fn statement_prefix(&self) -> String {
        format!("CREATE OR REPLACE VIEW \"{}\" AS ", self.view_name)
    }

    pub fn create_statement(&self) -> String {
        format!("{}{}", self.statement_prefix(), self.create_query)
    }

    pub fn drop_statement(&self) -> String {
        format!("DROP VIEW IF EXISTS \"{}\"", self.view_name)
    }

    /// Span in the source file for a 1-based position inside `create_query`
    pub fn span_for_position(&self, position: Option<usize>) -> SrcSpan {
        position
            .and_then(|p| p.checked_sub(1))
            .and_then(|offset| self.source_map.resolve(offset))
            .map(|offset| SrcSpan::at_offset(&self.file_contents, offset))
            .unwrap_or(self.source_start)
    }
}

/// Dependency graph of view definitions keyed by qualified name
#[derive(Debug, Clone, Default)]
pub struct ViewGraph {
    views: BTreeMap<QualifiedViewName, ViewDefinition>,

    /// Include the snake_cased hint in generated names
    name_hints: bool,
}

impl ViewGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name_hints(mut self, name_hints: bool) -> Self {
        self.name_hints = name_hints;
        self
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn get(&self, name: &QualifiedViewName) -> Option<&ViewDefinition> {
        self.views.get(name)
    }

    pub fn contains(&self, name: &QualifiedViewName) -> bool {
        self.views.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QualifiedViewName, &ViewDefinition)> {
        self.views.iter()
    }

    /// Generated name of a resolved view
    pub fn generated_name(&self, name: &QualifiedViewName) -> Option<&str> {
        self.views.get(name).and_then(|v| v.generated_name())
    }

    /// Views that reference `name` directly
    pub fn dependents(&self, name: &QualifiedViewName) -> Vec<&QualifiedViewName> {
        self.views
            .iter()
            .filter(|(_, def)| def.dependencies().contains(&name))
            .map(|(key, _)| key)
            .collect()
    }

    /// Insert or replace a definition
    ///
    /// Returns true when the fragment sequence changed (or the view is new).
    /// A changed view and all views depending on it are reset.
    pub fn upsert(&mut self, definition: ViewDefinition) -> bool {
        let name = definition.qualified_name().clone();

        let name_hints = self.name_hints;
        match self.views.get_mut(&name) {
            Some(existing)
                if *existing == definition
                    && (!name_hints || existing.hint() == definition.hint()) =>
            {
                // Same content: only file metadata is refreshed
                existing.refresh_metadata(definition);
                false
            }
            _ => {
                tracing::debug!(view = %name, "view definition changed");
                self.views.insert(name.clone(), definition);
                self.reset_including_dependents(&name);
                true
            }
        }
    }

    /// Remove a definition, resetting everything that depended on it
    pub fn remove(&mut self, name: &QualifiedViewName) -> Option<ViewDefinition> {
        let removed = self.views.remove(name)?;
        tracing::debug!(view = %name, "view removed");
        self.reset_including_dependents(name);
        Some(removed)
    }

    /// Replace the library with `definitions`
    ///
    /// Views absent from `definitions` are removed; returns the qualified
    /// names that were added, changed or removed.
    pub fn sync(&mut self, definitions: Vec<ViewDefinition>) -> Vec<QualifiedViewName> {
        let incoming: HashSet<QualifiedViewName> = definitions
            .iter()
            .map(|d| d.qualified_name().clone())
            .collect();

        let mut touched = Vec::new();

        let stale: Vec<QualifiedViewName> = self
            .views
            .keys()
            .filter(|k| !incoming.contains(*k))
            .cloned()
            .collect();
        for name in stale {
            self.remove(&name);
            touched.push(name);
        }

        for definition in definitions {
            let name = definition.qualified_name().clone();
            if self.upsert(definition) && !touched.contains(&name) {
                touched.push(name);
            }
        }

        touched
    }

    /// Reset `name` and every view that transitively depends on it
    ///
    /// `name` itself may already be gone from the graph.
    pub fn reset_including_dependents(&mut self, name: &QualifiedViewName) {
        let mut visited: HashSet<QualifiedViewName> = HashSet::new();
        let mut stack = vec![name.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(def) = self.views.get_mut(&current) {
                def.reset();
            }

            for dependent in self.dependents(&current) {
                if !visited.contains(dependent) {
                    stack.push(dependent.clone());
                }
            }
        }
    }

    /// Resolve every view and return them in creation order
    pub fn resolve(&mut self) -> Result<Vec<SqlCreateView>, ViewError> {
        let names: Vec<QualifiedViewName> = self.views.keys().cloned().collect();

        for name in &names {
            let mut visiting = HashSet::new();
            self.resolve_view(name, &mut visiting)?;
        }

        let order = self.topological_order()?;

        order
            .into_iter()
            .map(|name| {
                let def = self
                    .views
                    .get(&name)
                    .ok_or_else(|| ViewError::Internal(format!("view \"{}\" vanished", name)))?;
                let view_name = def
                    .generated_name()
                    .ok_or_else(|| ViewError::Unresolved(name.clone()))?
                    .to_string();
                let (create_query, source_map) = def
                    .resolved_query()
                    .ok_or_else(|| ViewError::Unresolved(name.clone()))?;

                Ok(SqlCreateView {
                    qualified_name: name,
                    view_name,
                    create_query,
                    source_map,
                    file_name: def.file_name().to_string(),
                    file_contents: def.file_contents().to_string(),
                    source_start: def.source_start(),
                })
            })
            .collect()
    }

    fn resolve_view(
        &mut self,
        name: &QualifiedViewName,
        visiting: &mut HashSet<QualifiedViewName>,
    ) -> Result<String, ViewError> {
        let pending = {
            let def = self
                .views
                .get(name)
                .ok_or_else(|| ViewError::Internal(format!("unknown view \"{}\"", name)))?;

            if let Some(generated) = def.generated_name() {
                return Ok(generated.to_string());
            }
            def.pending_dependencies()
        };

        if !visiting.insert(name.clone()) {
            return Err(ViewError::SelfDependency(name.clone()));
        }

        for dependency in pending {
            if !self.views.contains_key(&dependency) {
                return Err(ViewError::MissingDependency {
                    view: name.clone(),
                    dependency,
                });
            }

            let dependency_name = self.resolve_view(&dependency, visiting)?;

            if let Some(def) = self.views.get_mut(name) {
                def.substitute(&dependency, &dependency_name);
            }
        }

        visiting.remove(name);

        let name_hints = self.name_hints;
        self.views
            .get_mut(name)
            .and_then(|def| def.compute_generated_name(name_hints))
            .ok_or_else(|| ViewError::Unresolved(name.clone()))
    }

    /// Depth-first order with every view after its dependencies
    pub fn topological_order(&self) -> Result<Vec<QualifiedViewName>, ViewError> {
        let mut visited: HashSet<&QualifiedViewName> = HashSet::new();
        let mut order: Vec<QualifiedViewName> = Vec::with_capacity(self.views.len());

        for name in self.views.keys() {
            let mut path = HashSet::new();
            self.visit(name, &mut visited, &mut path, &mut order)?;
        }

        if order.len() != self.views.len() {
            return Err(ViewError::Internal(format!(
                "ordered {} views out of {}",
                order.len(),
                self.views.len()
            )));
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a QualifiedViewName,
        visited: &mut HashSet<&'a QualifiedViewName>,
        path: &mut HashSet<&'a QualifiedViewName>,
        order: &mut Vec<QualifiedViewName>,
    ) -> Result<(), ViewError> {
        if visited.contains(name) {
            return Ok(());
        }
        if !path.insert(name) {
            return Err(ViewError::SelfDependency(name.clone()));
        }

        let def = self
            .views
            .get(name)
            .ok_or_else(|| ViewError::Internal(format!("unknown view \"{}\"", name)))?;

        for dependency in def.dependencies() {
            if !self.views.contains_key(dependency) {
                return Err(ViewError::MissingDependency {
                    view: name.clone(),
                    dependency: dependency.clone(),
                });
            }
            self.visit(dependency, visited, path, order)?;
        }

        path.remove(name);
        visited.insert(name);
        order.push(name.clone());
        Ok(())
    }
}
