//! Column types and the canonical type vocabulary
//!
//! Both the shape a caller declares for a query and the shape computed from
//! the database are expressed as [`ColumnTypes`]. Comparison always goes
//! through [`ColumnTypes::canonical`], never through field-by-field equality,
//! so ordering differences in the declaration do not matter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{CustomSqlTypeMapping, UniqueTableColumnType};

/// Nullability of a single result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColNullability {
    /// Provably not null
    Req,

    /// May be null
    Opt,
}

impl std::fmt::Display for ColNullability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Req => write!(f, "Req"),
            Self::Opt => write!(f, "Opt"),
        }
    }
}

/// Semantic SQL type name (`int`, `text`, `person(id)`, ...)
///
/// The empty name stands for the untyped SQL `NULL` literal when used as a
/// parameter type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlType(String);

impl SqlType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Type used for parameters bound to a literal `NULL`
    pub fn null() -> Self {
        Self(String::new())
    }

    /// Semantic type for a raw `pg_type.typname`
    pub fn from_engine_name(typname: &str) -> Self {
        Self::new(normalize_type_name(typname))
    }

    /// Type of a column registered in `unique_table_column_types`
    pub fn unique_column(table: &str, column: &str) -> Self {
        Self(format!("{}({})", table, column))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SqlType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Map an engine type name to the semantic vocabulary
pub fn normalize_type_name(typname: &str) -> String {
    match typname {
        "int2" | "int4" | "int8" => "int",
        "bool" => "boolean",
        "text" | "varchar" | "bpchar" | "name" => "text",
        "float4" | "float8" => "double",
        "json" | "jsonb" => "json",
        other => other,
    }
    .to_string()
}

/// Nullability and type of one column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    pub nullability: ColNullability,
    pub sql_type: SqlType,
}

impl ColumnType {
    pub fn req(sql_type: impl Into<String>) -> Self {
        Self { nullability: ColNullability::Req, sql_type: SqlType::new(sql_type) }
    }

    pub fn opt(sql_type: impl Into<String>) -> Self {
        Self { nullability: ColNullability::Opt, sql_type: SqlType::new(sql_type) }
    }
}

/// A named column entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedColumn {
    pub name: String,

    #[serde(flatten)]
    pub column_type: ColumnType,
}

/// Ordered map of result column name to column type
///
/// Insertion order is kept for rendering; inserting an existing name
/// replaces its type in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnTypes {
    columns: Vec<NamedColumn>,
}

impl ColumnTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.insert(name, column_type);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, column_type: ColumnType) {
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.column_type = column_type,
            None => self.columns.push(NamedColumn { name, column_type }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.column_type)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedColumn> {
        self.columns.iter()
    }

    /// Stable string used for comparison and cache fingerprints
    ///
    /// Columns are sorted by name, one line each:
    /// `"<json-escaped name>":<Req|Opt> <sql type>`.
    pub fn canonical(&self) -> String {
        let mut sorted: Vec<&NamedColumn> = self.columns.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::new();
        for column in sorted {
            out.push_str(&json_string(&column.name));
            out.push(':');
            out.push_str(&column.column_type.nullability.to_string());
            out.push(' ');
            out.push_str(column.column_type.sql_type.as_str());
            out.push('\n');
        }
        out
    }

    /// Order-insensitive comparison
    pub fn same_shape(&self, other: &ColumnTypes) -> bool {
        self.canonical() == other.canonical()
    }
}

impl FromIterator<(String, ColumnType)> for ColumnTypes {
    fn from_iter<I: IntoIterator<Item = (String, ColumnType)>>(iter: I) -> Self {
        let mut types = ColumnTypes::new();
        for (name, column_type) in iter {
            types.insert(name, column_type);
        }
        types
    }
}

fn json_string(s: &str) -> String {
    // Serializing a &str cannot fail
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// Whether `name` can be written as a bare object key in the host language
fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');

    starts_well && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Renders column shapes back into the host-language type syntax
///
/// Used for the "Fix it to:" suggestion attached to type mismatches.
#[derive(Debug, Clone)]
pub struct TypeRenderer {
    /// SQL type name -> host type name
    host_types: BTreeMap<String, String>,
}

impl Default for TypeRenderer {
    fn default() -> Self {
        let host_types = [
            ("int", "number"),
            ("text", "string"),
            ("boolean", "boolean"),
            ("date", "LocalDate"),
            ("double", "number"),
            ("timestamptz", "Instant"),
            ("timestamp", "LocalDateTime"),
            ("time", "LocalTime"),
            ("json", "unknown"),
        ]
        .into_iter()
        .map(|(sql, host)| (sql.to_string(), host.to_string()))
        .collect();

        Self { host_types }
    }
}

impl TypeRenderer {
    /// Built-in vocabulary extended with the configured mappings
    ///
    /// Custom mappings override built-in ones for the same SQL type.
    pub fn with_mappings(
        custom: &[CustomSqlTypeMapping],
        unique_columns: &[UniqueTableColumnType],
    ) -> Self {
        let mut renderer = Self::default();

        for mapping in custom {
            renderer
                .host_types
                .insert(mapping.sql_type_name.clone(), mapping.host_type_name.clone());
        }

        for unique in unique_columns {
            let sql_type = SqlType::unique_column(&unique.table_name, &unique.column_name);
            renderer
                .host_types
                .insert(sql_type.as_str().to_string(), unique.host_type_name.clone());
        }

        renderer
    }

    pub fn host_type(&self, sql_type: &SqlType) -> String {
        self.host_types
            .get(sql_type.as_str())
            .cloned()
            .unwrap_or_else(|| sql_type.as_str().to_string())
    }

    /// Render a shape in result order
    ///
    /// ```text
    /// {
    ///   id: Req<number>,
    ///   name: Opt<string>
    /// }
    /// ```
    pub fn render(&self, types: &ColumnTypes) -> String {
        if types.is_empty() {
            return "{}".to_string();
        }

        let lines: Vec<String> = types
            .iter()
            .map(|column| {
                let name = if is_plain_identifier(&column.name) {
                    column.name.clone()
                } else {
                    json_string(&column.name)
                };

                format!(
                    "  {}: {}<{}>",
                    name,
                    column.column_type.nullability,
                    self.host_type(&column.column_type.sql_type)
                )
            })
            .collect();

        format!("{{\n{}\n}}", lines.join(",\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn engine_names_are_normalized() {
        assert_eq!(SqlType::from_engine_name("int4").as_str(), "int");
        assert_eq!(SqlType::from_engine_name("int8").as_str(), "int");
        assert_eq!(SqlType::from_engine_name("varchar").as_str(), "text");
        assert_eq!(SqlType::from_engine_name("jsonb").as_str(), "json");
        assert_eq!(SqlType::from_engine_name("uuid").as_str(), "uuid");
    }

    #[test]
    fn canonical_is_order_insensitive() {
        let a = ColumnTypes::new()
            .with("id", ColumnType::req("int"))
            .with("name", ColumnType::opt("text"));
        let b = ColumnTypes::new()
            .with("name", ColumnType::opt("text"))
            .with("id", ColumnType::req("int"));

        assert!(a.same_shape(&b));
        assert_eq!(a.canonical(), "\"id\":Req int\n\"name\":Opt text\n");
    }

    #[test]
    fn canonical_distinguishes_nullability() {
        let req = ColumnTypes::new().with("id", ColumnType::req("int"));
        let opt = ColumnTypes::new().with("id", ColumnType::opt("int"));
        assert!(!req.same_shape(&opt));
    }

    #[test]
    fn insert_replaces_existing() {
        let mut types = ColumnTypes::new();
        types.insert("id", ColumnType::req("int"));
        types.insert("id", ColumnType::opt("int"));

        assert_eq!(types.len(), 1);
        assert_eq!(types.get("id"), Some(&ColumnType::opt("int")));
    }

    #[test]
    fn render_shape() {
        let renderer = TypeRenderer::default();
        let types = ColumnTypes::new()
            .with("id", ColumnType::opt("int"))
            .with("created", ColumnType::req("timestamptz"))
            .with("first name", ColumnType::req("text"));

        assert_eq!(
            renderer.render(&types),
            "{\n  id: Opt<number>,\n  created: Req<Instant>,\n  \"first name\": Req<string>\n}"
        );
    }

    #[test]
    fn bare_keys_follow_identifier_rules() {
        assert!(is_plain_identifier("person_id"));
        assert!(is_plain_identifier("$count"));
        assert!(is_plain_identifier("_x1"));

        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("1st"));
        assert!(!is_plain_identifier("first-name"));
        assert!(!is_plain_identifier("prénom"));
    }

    #[test]
    fn render_empty() {
        assert_eq!(TypeRenderer::default().render(&ColumnTypes::new()), "{}");
    }

    #[test]
    fn custom_and_unique_mappings() {
        let renderer = TypeRenderer::with_mappings(
            &[CustomSqlTypeMapping {
                host_type_name: "Money".to_string(),
                sql_type_name: "numeric".to_string(),
            }],
            &[UniqueTableColumnType {
                host_type_name: "PersonId".to_string(),
                table_name: "person".to_string(),
                column_name: "id".to_string(),
            }],
        );

        assert_eq!(renderer.host_type(&SqlType::new("numeric")), "Money");
        assert_eq!(renderer.host_type(&SqlType::unique_column("person", "id")), "PersonId");
        assert_eq!(renderer.host_type(&SqlType::new("inet")), "inet");
    }

    #[test]
    fn column_types_json_shape() {
        let types = ColumnTypes::new().with("id", ColumnType::req("int"));
        let json = serde_json::to_value(&types).unwrap();

        assert_eq!(
            json,
            serde_json::json!([{ "name": "id", "nullability": "Req", "sql_type": "int" }])
        );
    }
}
