//! Integration tests for view graph resolution

use pretty_assertions::assert_eq;
use sqlcheck_core::QualifiedViewName;
use sqlcheck_views::{
    ViewDefinition, ViewError, ViewFragment, ViewGraph, ViewSource, ViewSourceFragment,
};

fn qn(name: &str) -> QualifiedViewName {
    QualifiedViewName::new("src/views", name)
}

fn lit(text: &str) -> ViewFragment {
    ViewFragment::Literal(text.to_string())
}

fn reference(name: &str) -> ViewFragment {
    ViewFragment::Reference(qn(name))
}

fn view(name: &str, fragments: Vec<ViewFragment>) -> ViewDefinition {
    ViewDefinition::new(qn(name), fragments)
}

/// a <- b <- d, a <- c <- d
fn diamond() -> ViewGraph {
    let mut graph = ViewGraph::new();
    graph.upsert(view("d", vec![lit("SELECT * FROM "), reference("b"), lit(" JOIN "), reference("c")]));
    graph.upsert(view("c", vec![lit("SELECT * FROM "), reference("a")]));
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("a")]));
    graph.upsert(view("a", vec![lit("SELECT id FROM person")]));
    graph
}

// ============================================================================
// Resolution and ordering
// ============================================================================

#[test]
fn creation_order_respects_dependencies() {
    let mut graph = diamond();
    let views = graph.resolve().unwrap();

    assert_eq!(views.len(), 4);

    let index = |name: &str| {
        views
            .iter()
            .position(|v| v.qualified_name == qn(name))
            .unwrap()
    };

    for (_, def) in graph.iter() {
        for dep in def.dependencies() {
            assert!(index(&dep.name) < index(&def.qualified_name().name));
        }
    }
}

#[test]
fn references_are_substituted_with_generated_names() {
    let mut graph = diamond();
    let views = graph.resolve().unwrap();

    let a = views.iter().find(|v| v.qualified_name == qn("a")).unwrap();
    let b = views.iter().find(|v| v.qualified_name == qn("b")).unwrap();

    assert_eq!(b.create_query, format!("SELECT * FROM \"{}\"", a.view_name));
    assert_eq!(
        b.create_statement(),
        format!("CREATE OR REPLACE VIEW \"{}\" AS SELECT * FROM \"{}\"", b.view_name, a.view_name)
    );
}

#[test]
fn resolve_is_idempotent() {
    let mut graph = diamond();
    let first = graph.resolve().unwrap();
    let second = graph.resolve().unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Cycles and missing dependencies
// ============================================================================

#[test]
fn direct_self_reference_is_rejected() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("a", vec![lit("SELECT * FROM "), reference("a")]));

    assert_eq!(graph.resolve(), Err(ViewError::SelfDependency(qn("a"))));
}

#[test]
fn transitive_cycle_is_rejected() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("a", vec![lit("SELECT * FROM "), reference("c")]));
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("a")]));
    graph.upsert(view("c", vec![lit("SELECT * FROM "), reference("b")]));

    let err = graph.resolve().unwrap_err();
    assert!(matches!(err, ViewError::SelfDependency(_)));
    assert!(err.to_string().starts_with("View depends on itself"));
}

#[test]
fn missing_dependency_is_rejected() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("ghost")]));

    assert_eq!(
        graph.resolve(),
        Err(ViewError::MissingDependency { view: qn("b"), dependency: qn("ghost") })
    );
}

// ============================================================================
// Content addressing
// ============================================================================

#[test]
fn identical_fragments_share_a_name() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("first", vec![lit("SELECT 1 AS one")]).with_hint("first"));
    graph.upsert(view("second", vec![lit("SELECT 1 AS one")]).with_hint("second"));
    graph.resolve().unwrap();

    assert_eq!(graph.generated_name(&qn("first")), graph.generated_name(&qn("second")));
}

#[test]
fn one_character_changes_the_name() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("v", vec![lit("SELECT 1 AS one")]));
    graph.resolve().unwrap();
    let before = graph.generated_name(&qn("v")).unwrap().to_string();

    graph.upsert(view("v", vec![lit("SELECT 2 AS one")]));
    graph.resolve().unwrap();
    let after = graph.generated_name(&qn("v")).unwrap().to_string();

    assert_ne!(before, after);
}

#[test]
fn hints_only_decorate_names() {
    let mut graph = ViewGraph::new().with_name_hints(true);
    graph.upsert(view("v", vec![lit("SELECT 1 AS one")]).with_hint("activePeople"));
    graph.resolve().unwrap();

    let name = graph.generated_name(&qn("v")).unwrap();
    assert!(name.starts_with("view_active_people_"));
}

// ============================================================================
// Incremental re-resolution
// ============================================================================

#[test]
fn upstream_change_renames_dependents_only() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("a", vec![lit("SELECT id FROM person")]));
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("a")]));
    graph.upsert(view("c", vec![lit("SELECT id FROM pet")]));
    graph.resolve().unwrap();

    let name = |g: &ViewGraph, n: &str| g.generated_name(&qn(n)).unwrap().to_string();
    let (a1, b1, c1) = (name(&graph, "a"), name(&graph, "b"), name(&graph, "c"));

    assert!(graph.upsert(view("a", vec![lit("SELECT id, name FROM person")])));
    assert_eq!(graph.generated_name(&qn("b")), None);
    assert_eq!(graph.generated_name(&qn("c")), Some(c1.as_str()));

    graph.resolve().unwrap();

    assert_ne!(name(&graph, "a"), a1);
    assert_ne!(name(&graph, "b"), b1);
    assert_eq!(name(&graph, "c"), c1);
}

#[test]
fn unchanged_upsert_keeps_dependents() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("a", vec![lit("SELECT 1 AS x")]));
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("a")]));
    graph.resolve().unwrap();

    assert!(!graph.upsert(view("a", vec![lit("SELECT 1 AS x")])));
    assert!(graph.generated_name(&qn("b")).is_some());
}

#[test]
fn sync_removes_stale_views() {
    let mut graph = diamond();
    graph.resolve().unwrap();

    let touched = graph.sync(vec![view("a", vec![lit("SELECT id FROM person")])]);

    assert_eq!(graph.len(), 1);
    assert_eq!(touched.len(), 3);
    assert!(graph.generated_name(&qn("a")).is_some());
}

#[test]
fn moved_source_keeps_resolution_and_updates_positions() {
    let source = |file_name: &str, source_pos: usize| {
        ViewDefinition::from_source(ViewSource {
            qualified_name: qn("a"),
            file_name: file_name.to_string(),
            file_contents: String::new(),
            hint: None,
            fragments: vec![ViewSourceFragment::Literal {
                text: "SELECT 1 AS x".to_string(),
                source_pos,
            }],
        })
    };

    let mut graph = ViewGraph::new();
    graph.upsert(source("src/views.ts", 10));
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("a")]));
    graph.resolve().unwrap();
    let before = graph.generated_name(&qn("a")).unwrap().to_string();

    assert!(!graph.upsert(source("src/moved.ts", 42)));

    let a = graph.get(&qn("a")).unwrap();
    assert_eq!(a.generated_name(), Some(before.as_str()));
    assert_eq!(a.file_name(), "src/moved.ts");

    let (_, source_map) = a.resolved_query().unwrap();
    assert_eq!(source_map.resolve(0), Some(42));
    assert!(graph.generated_name(&qn("b")).is_some());
}

#[test]
fn removing_a_dependency_breaks_dependents() {
    let mut graph = ViewGraph::new();
    graph.upsert(view("a", vec![lit("SELECT 1 AS x")]));
    graph.upsert(view("b", vec![lit("SELECT * FROM "), reference("a")]));
    graph.resolve().unwrap();

    graph.remove(&qn("a"));

    assert!(matches!(graph.resolve(), Err(ViewError::MissingDependency { .. })));
}
