//! Query resolution
//!
//! Turns a parser-produced [`QueryCallExpression`] into the SQL text sent to
//! the database: literals are copied, parameters become positional
//! placeholders and view references become the quoted generated name of the
//! referenced view.

use sqlcheck_core::{
    Diagnostic, DiagnosticCode, ExpectedColumns, QueryCallExpression, QueryFragment,
    ResolvedQuery, SourceMap, SrcSpan,
};
use sqlcheck_views::ViewGraph;

/// Resolve one query against the current view graph
///
/// Fails with one diagnostic per view reference that has no generated name,
/// or when the SQL text is blank. Parser-reported errors lead the list so
/// they are never dropped.
pub fn resolve_query(
    expr: &QueryCallExpression,
    graph: &ViewGraph,
) -> Result<ResolvedQuery, Vec<Diagnostic>> {
    let source_start = source_start(expr);

    let mut text = String::new();
    let mut offset = 0;
    let mut source_map = SourceMap::new();
    let mut param_index = 0;
    let mut missing = Vec::new();

    for fragment in &expr.fragments {
        let chunk = match fragment {
            QueryFragment::Literal { text: literal, source_pos } => {
                source_map.push(offset, *source_pos);
                literal.clone()
            }
            QueryFragment::Param { sql_type } => {
                param_index += 1;
                if sql_type.is_null() {
                    format!("(${})", param_index)
                } else {
                    format!("(${}::{})", param_index, sql_type)
                }
            }
            QueryFragment::ViewRef(name) => match graph.generated_name(name) {
                Some(view_name) => format!("\"{}\"", view_name),
                None => {
                    missing.push(
                        Diagnostic::new(
                            DiagnosticCode::ViewReferenceNotFound,
                            &expr.file_name,
                            &expr.file_contents,
                            source_start,
                            "SQL View Reference not found",
                        )
                        .with_message(format!("No view named \"{}\"", name)),
                    );
                    continue;
                }
            },
        };

        offset += chunk.chars().count();
        text.push_str(&chunk);
    }

    if text.trim().is_empty() && missing.is_empty() {
        missing.push(Diagnostic::new(
            DiagnosticCode::InvalidQuery,
            &expr.file_name,
            &expr.file_contents,
            source_start,
            "Query has no SQL text",
        ));
    }

    if !missing.is_empty() {
        return Err(expr.errors.iter().cloned().chain(missing).collect());
    }

    Ok(ResolvedQuery {
        file_name: expr.file_name.clone(),
        file_contents: expr.file_contents.clone(),
        text,
        source_map,
        expected: ExpectedColumns::from(&expr.type_argument),
        type_argument_span: expr.type_argument_span,
        source_start,
        errors: expr.errors.clone(),
    })
}

/// First non-whitespace character of the first literal
fn source_start(expr: &QueryCallExpression) -> SrcSpan {
    expr.fragments
        .iter()
        .find_map(|fragment| match fragment {
            QueryFragment::Literal { source_pos, .. } => Some(*source_pos),
            _ => None,
        })
        .map(|pos| SrcSpan::first_token_after(&expr.file_contents, pos))
        .unwrap_or(SrcSpan::File)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlcheck_core::{ColumnType, ColumnTypes, QualifiedViewName, SqlType, TypeArgument};
    use sqlcheck_views::{ViewDefinition, ViewFragment};

    const FILE: &str = "val q = sql\"\"\"\n  SELECT id FROM person WHERE id = ${id}\"\"\"";

    fn literal(text: &str, source_pos: usize) -> QueryFragment {
        QueryFragment::Literal {
            text: text.to_string(),
            source_pos,
        }
    }

    fn expr(fragments: Vec<QueryFragment>, type_argument: TypeArgument) -> QueryCallExpression {
        QueryCallExpression {
            file_name: "Queries.kt".to_string(),
            file_contents: FILE.to_string(),
            type_argument,
            type_argument_span: SrcSpan::LineAndCol { line: 1, col: 9 },
            fragments,
            errors: Vec::new(),
        }
    }

    #[test]
    fn parameters_are_numbered_and_cast() {
        let query = expr(
            vec![
                literal("\n  SELECT id FROM person WHERE id = ", 14),
                QueryFragment::Param { sql_type: SqlType::new("int") },
                literal(" OR name = ", 60),
                QueryFragment::Param { sql_type: SqlType::null() },
            ],
            TypeArgument::Omitted,
        );

        let resolved = resolve_query(&query, &ViewGraph::new()).unwrap();
        assert_eq!(
            resolved.text,
            "\n  SELECT id FROM person WHERE id = ($1::int) OR name = ($2)"
        );
        assert_eq!(resolved.expected, ExpectedColumns::Typed(ColumnTypes::new()));
        assert_eq!(resolved.source_start, SrcSpan::LineAndCol { line: 2, col: 3 });
    }

    #[test]
    fn source_map_points_into_literals() {
        let query = expr(
            vec![
                literal("SELECT ", 100),
                QueryFragment::Param { sql_type: SqlType::new("int") },
                literal(" AS x", 200),
            ],
            TypeArgument::Untyped,
        );

        let resolved = resolve_query(&query, &ViewGraph::new()).unwrap();
        // "SELECT ($1::int) AS x": " AS x" starts at generated offset 16
        assert_eq!(resolved.source_map.resolve(16), Some(200));
        assert_eq!(resolved.source_map.resolve(2), Some(102));
        assert_eq!(resolved.expected, ExpectedColumns::Untyped);
    }

    #[test]
    fn view_references_use_generated_names() {
        let people = QualifiedViewName::new("app", "people");
        let mut graph = ViewGraph::new();
        graph.upsert(ViewDefinition::new(
            people.clone(),
            vec![ViewFragment::Literal("SELECT id FROM person".to_string())],
        ));
        graph.resolve().unwrap();
        let generated = graph.generated_name(&people).unwrap().to_string();

        let query = expr(
            vec![
                literal("SELECT id FROM ", 0),
                QueryFragment::ViewRef(people),
            ],
            TypeArgument::Typed(ColumnTypes::new().with("id", ColumnType::req("int"))),
        );

        let resolved = resolve_query(&query, &graph).unwrap();
        assert_eq!(resolved.text, format!("SELECT id FROM \"{}\"", generated));
    }

    #[test]
    fn unknown_view_reference_is_reported() {
        let query = expr(
            vec![
                literal("SELECT id FROM ", 14),
                QueryFragment::ViewRef(QualifiedViewName::new("app", "ghost")),
            ],
            TypeArgument::Omitted,
        );

        let errors = resolve_query(&query, &ViewGraph::new()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::ViewReferenceNotFound);
        assert_eq!(errors[0].messages[0], "SQL View Reference not found");
    }

    #[test]
    fn blank_query_is_invalid() {
        let query = expr(vec![literal("  \n  ", 14)], TypeArgument::Omitted);

        let errors = resolve_query(&query, &ViewGraph::new()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::InvalidQuery);
        assert_eq!(errors[0].messages[0], "Query has no SQL text");
    }

    #[test]
    fn parser_errors_lead_resolution_failures() {
        let mut query = expr(
            vec![
                literal("SELECT id FROM ", 14),
                QueryFragment::ViewRef(QualifiedViewName::new("app", "ghost")),
            ],
            TypeArgument::Omitted,
        );
        query.errors.push(Diagnostic::new(
            DiagnosticCode::InvalidQuery,
            "Queries.kt",
            FILE,
            SrcSpan::LineAndCol { line: 1, col: 9 },
            "Type argument is not a record type",
        ));

        let errors = resolve_query(&query, &ViewGraph::new()).unwrap_err();
        let codes: Vec<DiagnosticCode> = errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![DiagnosticCode::InvalidQuery, DiagnosticCode::ViewReferenceNotFound]
        );
    }
}
