//! Outer-join nullability analysis
//!
//! PostgreSQL reports the origin relation of a result column even when the
//! column is read through the nullable side of an outer join. This module
//! maps each result column back to the range entry (table alias, derived
//! table or CTE reference) it is read from, so a not-null origin column is
//! downgraded to optional only when that entry is outer-joined.
//!
//! Names are compared by their last identifier, lowercased unless quoted,
//! which matches `pg_class.relname` for unqualified lookups. Columns that
//! cannot be attributed to one entry (wildcards, unqualified names,
//! expressions) fall back to the origin relation: they are nullable when any
//! outer-joined entry reads from it.

use sqlparser::ast::{
    Expr, Ident, JoinOperator, ObjectName, Query, SelectItem, SetExpr, Statement, TableAlias,
    TableFactor, TableWithJoins,
};
use std::collections::{BTreeSet, HashMap};

use crate::parser::{ParseError, SqlParser};

/// Outer-join structure of a single query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OuterJoinAnalysis {
    shape: Shape,
}

impl OuterJoinAnalysis {
    /// Analyze the first statement of `sql`
    pub fn from_sql(sql: &str) -> Result<Self, ParseError> {
        let parsed = SqlParser::postgres().parse(sql)?;

        Ok(parsed
            .first_statement()
            .map(Self::from_statement)
            .unwrap_or_default())
    }

    pub fn from_statement(statement: &Statement) -> Self {
        let mut analyzer = Analyzer::default();

        let shape = match statement {
            Statement::Query(query) => analyzer.query(query),
            Statement::CreateView { query, .. } => analyzer.query(query),
            _ => Shape::Opaque,
        };

        Self { shape }
    }

    /// Whether the result column at `position` (0-based), whose origin
    /// PostgreSQL reports as `relation`, is read through an outer join
    pub fn is_nullable(&self, position: usize, relation: &str) -> bool {
        self.shape.position_nullable(position, relation)
    }

    /// Base relations read by some outer-joined range entry
    pub fn relations(&self) -> BTreeSet<String> {
        let mut relations = BTreeSet::new();
        self.shape.collect_nullable(&mut relations);
        relations
    }

    pub fn is_empty(&self) -> bool {
        self.relations().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Shape {
    #[default]
    Opaque,
    Select(SelectShape),
    /// Branches of a set operation, in order
    SetOperation(Vec<Shape>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectShape {
    entries: Vec<RangeEntry>,
    items: Vec<Item>,
}

/// One entry of a FROM clause
#[derive(Debug, Clone, PartialEq, Eq)]
struct RangeEntry {
    /// Alias, else relation name; empty for unaliased subqueries
    visible: String,

    /// Base relation name, `None` for derived tables and CTE references
    relation: Option<String>,

    /// Body of a derived table or referenced CTE
    inner: Option<Box<Shape>>,

    /// Sits on the nullable side of an outer join
    nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Column {
        qualifier: Option<String>,
        name: String,
        output: String,
    },
    Expr {
        output: Option<String>,
    },
    Wildcard,
}

impl Item {
    fn output(&self) -> Option<&str> {
        match self {
            Item::Column { output, .. } => Some(output),
            Item::Expr { output } => output.as_deref(),
            Item::Wildcard => None,
        }
    }
}

impl Shape {
    fn position_nullable(&self, position: usize, relation: &str) -> bool {
        match self {
            Shape::Opaque => false,
            Shape::Select(select) => select.position_nullable(position, relation),
            Shape::SetOperation(branches) => branches
                .iter()
                .any(|branch| branch.position_nullable(position, relation)),
        }
    }

    /// Nullability of the output column called `name`, as seen by an outer query
    fn name_nullable(&self, name: &str, relation: &str) -> bool {
        match self {
            Shape::Opaque => false,
            Shape::Select(select) => select.name_nullable(name, relation),
            // Set operations take their column names from the first branch
            Shape::SetOperation(branches) => {
                match branches.first().and_then(|first| first.output_position(name)) {
                    Some(position) => self.position_nullable(position, relation),
                    None => self.relation_nullable(relation),
                }
            }
        }
    }

    fn output_position(&self, name: &str) -> Option<usize> {
        match self {
            Shape::Opaque => None,
            Shape::Select(select) => select
                .items
                .iter()
                .take_while(|item| **item != Item::Wildcard)
                .position(|item| item.output() == Some(name)),
            Shape::SetOperation(branches) => branches.first()?.output_position(name),
        }
    }

    fn relation_nullable(&self, relation: &str) -> bool {
        match self {
            Shape::Opaque => false,
            Shape::Select(select) => select.relation_nullable(relation),
            Shape::SetOperation(branches) => branches
                .iter()
                .any(|branch| branch.relation_nullable(relation)),
        }
    }

    fn reads(&self, relation: &str) -> bool {
        match self {
            Shape::Opaque => false,
            Shape::Select(select) => select.entries.iter().any(|entry| entry.reads(relation)),
            Shape::SetOperation(branches) => branches.iter().any(|branch| branch.reads(relation)),
        }
    }

    fn collect_reads(&self, out: &mut BTreeSet<String>) {
        match self {
            Shape::Opaque => {}
            Shape::Select(select) => {
                for entry in &select.entries {
                    out.extend(entry.relation.iter().cloned());
                    if let Some(inner) = &entry.inner {
                        inner.collect_reads(out);
                    }
                }
            }
            Shape::SetOperation(branches) => {
                for branch in branches {
                    branch.collect_reads(out);
                }
            }
        }
    }

    fn collect_nullable(&self, out: &mut BTreeSet<String>) {
        match self {
            Shape::Opaque => {}
            Shape::Select(select) => {
                for entry in &select.entries {
                    if entry.nullable {
                        out.extend(entry.relation.iter().cloned());
                    }
                    if let Some(inner) = &entry.inner {
                        if entry.nullable {
                            inner.collect_reads(out);
                        } else {
                            inner.collect_nullable(out);
                        }
                    }
                }
            }
            Shape::SetOperation(branches) => {
                for branch in branches {
                    branch.collect_nullable(out);
                }
            }
        }
    }
}

impl SelectShape {
    fn position_nullable(&self, position: usize, relation: &str) -> bool {
        for (index, item) in self.items.iter().enumerate() {
            if *item == Item::Wildcard {
                // Positions past a wildcard depend on table arity
                break;
            }
            if index == position {
                return self.item_nullable(item, relation);
            }
        }
        self.relation_nullable(relation)
    }

    fn name_nullable(&self, name: &str, relation: &str) -> bool {
        match self.items.iter().find(|item| item.output() == Some(name)) {
            Some(item) => self.item_nullable(item, relation),
            None => self.relation_nullable(relation),
        }
    }

    fn item_nullable(&self, item: &Item, relation: &str) -> bool {
        let Item::Column {
            qualifier: Some(qualifier),
            name,
            ..
        } = item
        else {
            return self.relation_nullable(relation);
        };

        match self.entries.iter().find(|entry| entry.visible == *qualifier) {
            Some(entry) => {
                entry.nullable
                    || entry
                        .inner
                        .as_ref()
                        .is_some_and(|inner| inner.name_nullable(name, relation))
            }
            None => self.relation_nullable(relation),
        }
    }

    fn relation_nullable(&self, relation: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.relation_nullable(relation))
    }
}

impl RangeEntry {
    fn reads(&self, relation: &str) -> bool {
        self.relation.as_deref() == Some(relation)
            || self.inner.as_ref().is_some_and(|inner| inner.reads(relation))
    }

    fn relation_nullable(&self, relation: &str) -> bool {
        (self.nullable && self.reads(relation))
            || self
                .inner
                .as_ref()
                .is_some_and(|inner| inner.relation_nullable(relation))
    }
}

/// Walks a query building its shape
#[derive(Default)]
struct Analyzer {
    ctes: HashMap<String, Shape>,
}

impl Analyzer {
    fn query(&mut self, query: &Query) -> Shape {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let shape = self.query(&cte.query);
                self.ctes.insert(ident_name(&cte.alias.name), shape);
            }
        }

        self.set_expr(&query.body)
    }

    fn set_expr(&mut self, set_expr: &SetExpr) -> Shape {
        match set_expr {
            SetExpr::Select(select) => {
                let mut entries = Vec::new();
                for table_with_joins in &select.from {
                    self.table_with_joins(table_with_joins, &mut entries);
                }

                Shape::Select(SelectShape {
                    entries,
                    items: select.projection.iter().map(select_item).collect(),
                })
            }
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation { left, right, .. } => {
                let mut branches = Vec::new();
                for side in [left, right] {
                    match self.set_expr(side) {
                        Shape::SetOperation(nested) => branches.extend(nested),
                        shape => branches.push(shape),
                    }
                }
                Shape::SetOperation(branches)
            }
            _ => Shape::Opaque,
        }
    }

    fn table_with_joins(&mut self, table_with_joins: &TableWithJoins, entries: &mut Vec<RangeEntry>) {
        let start = entries.len();
        self.table_factor(&table_with_joins.relation, entries);

        for join in &table_with_joins.joins {
            // Everything joined so far forms the left side of the next join
            let right = entries.len();
            self.table_factor(&join.relation, entries);

            let nullable = match &join.join_operator {
                JoinOperator::LeftOuter(_) | JoinOperator::OuterApply => right..entries.len(),
                JoinOperator::RightOuter(_) => start..right,
                JoinOperator::FullOuter(_) => start..entries.len(),
                _ => continue,
            };

            for entry in &mut entries[nullable] {
                entry.nullable = true;
            }
        }
    }

    fn table_factor(&mut self, table_factor: &TableFactor, entries: &mut Vec<RangeEntry>) {
        let entry = match table_factor {
            TableFactor::Table { name, alias, .. } => {
                let relation = relation_name(name);
                let visible = alias_name(alias).unwrap_or_else(|| relation.clone());

                match self.ctes.get(&relation).filter(|_| name.0.len() == 1) {
                    Some(shape) => RangeEntry {
                        visible,
                        relation: None,
                        inner: Some(Box::new(shape.clone())),
                        nullable: false,
                    },
                    None => RangeEntry {
                        visible,
                        relation: Some(relation),
                        inner: None,
                        nullable: false,
                    },
                }
            }
            TableFactor::Derived { subquery, alias, .. } => RangeEntry {
                visible: alias_name(alias).unwrap_or_default(),
                relation: None,
                inner: Some(Box::new(self.query(subquery))),
                nullable: false,
            },
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.table_with_joins(table_with_joins, entries);
                return;
            }
            _ => RangeEntry {
                visible: String::new(),
                relation: None,
                inner: None,
                nullable: false,
            },
        };

        entries.push(entry);
    }
}

fn select_item(item: &SelectItem) -> Item {
    match item {
        SelectItem::UnnamedExpr(expr) => expr_item(expr, None),
        SelectItem::ExprWithAlias { expr, alias } => expr_item(expr, Some(ident_name(alias))),
        _ => Item::Wildcard,
    }
}

fn expr_item(expr: &Expr, alias: Option<String>) -> Item {
    match expr {
        Expr::Identifier(ident) => {
            let name = ident_name(ident);
            Item::Column {
                qualifier: None,
                output: alias.unwrap_or_else(|| name.clone()),
                name,
            }
        }
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let name = ident_name(&parts[parts.len() - 1]);
            Item::Column {
                qualifier: Some(ident_name(&parts[parts.len() - 2])),
                output: alias.unwrap_or_else(|| name.clone()),
                name,
            }
        }
        Expr::Nested(inner) => expr_item(inner, alias),
        _ => Item::Expr { output: alias },
    }
}

fn alias_name(alias: &Option<TableAlias>) -> Option<String> {
    alias.as_ref().map(|alias| ident_name(&alias.name))
}

fn relation_name(name: &ObjectName) -> String {
    name.0.last().map(ident_name).unwrap_or_default()
}

fn ident_name(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}
