//! Mock database connection for testing
//!
//! This connection never talks to a server. It is useful for:
//! - Unit testing the introspector, tracer and validator
//! - Asserting exactly which statements a check pass issued
//! - Simulating engine errors and connection loss
//!
//! ## Behavior
//!
//! - `describe` answers from scripted results, matched by exact SQL text
//!   first and then by the longest scripted key contained in the SQL.
//!   Unscripted statements describe as a syntax error.
//! - `execute` records the statement and fails if it contains a scripted
//!   failure pattern. `CREATE OR REPLACE VIEW "name" AS body` and
//!   `DROP VIEW IF EXISTS "name"` maintain an in-memory view list so
//!   `view_definitions` reflects what the pass created;
//!   `DROP SCHEMA public CASCADE` clears it.
//! - The table catalog is scripted and survives schema resets, standing in
//!   for the result of replaying migrations.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let conn = MockConnection::new()
//!     .with_table(16384, "person", &[("id", true), ("name", false)])
//!     .with_describe("SELECT id FROM person", Some(vec![
//!         DescribedColumn::new("id", 23).from_column(16384, 1),
//!     ]));
//! ```

use crate::connection::{DbConnection, DbError, DescribedColumn, TableColumnRow, ViewDefinitionRow};
use sqlcheck_core::PostgreSqlError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// First oid handed out to views created through `execute`
const FIRST_VIEW_OID: u32 = 50_000;

const CREATE_VIEW_PREFIX: &str = "CREATE OR REPLACE VIEW \"";
const DROP_VIEW_PREFIX: &str = "DROP VIEW IF EXISTS \"";

/// Built-in `pg_type` rows
const DEFAULT_TYPES: &[(u32, &str)] = &[
    (16, "bool"),
    (20, "int8"),
    (21, "int2"),
    (23, "int4"),
    (25, "text"),
    (114, "json"),
    (701, "float8"),
    (1043, "varchar"),
    (1082, "date"),
    (1083, "time"),
    (1114, "timestamp"),
    (1184, "timestamptz"),
    (1700, "numeric"),
    (2950, "uuid"),
    (3802, "jsonb"),
];

type DescribeResult = Result<Option<Vec<DescribedColumn>>, PostgreSqlError>;

#[derive(Default)]
struct MockState {
    describes: HashMap<String, DescribeResult>,
    failures: Vec<(String, PostgreSqlError)>,
    tables: Vec<TableColumnRow>,
    types: Vec<(u32, String)>,
    views: Vec<ViewDefinitionRow>,
    view_oids: HashMap<String, u32>,
    next_view_oid: u32,
    executed: Vec<String>,
    described: Vec<String>,
}

/// Mock database connection for testing
#[derive(Clone)]
pub struct MockConnection {
    state: Arc<RwLock<MockState>>,

    /// Fail every call with a connection error
    fail_connection: bool,

    /// Simulated latency per call (milliseconds)
    latency_ms: u64,
}

impl MockConnection {
    /// Create a mock with the built-in types and an empty catalog
    pub fn new() -> Self {
        let state = MockState {
            types: DEFAULT_TYPES
                .iter()
                .map(|(oid, name)| (*oid, name.to_string()))
                .collect(),
            next_view_oid: FIRST_VIEW_OID,
            ..MockState::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Configure to fail all calls with a connection error
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Add an ordinary table; columns are `(name, not_null)` numbered from 1
    pub fn with_table(self, table_oid: u32, table_name: &str, columns: &[(&str, bool)]) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            for (i, (column_name, not_null)) in columns.iter().enumerate() {
                state.tables.push(TableColumnRow {
                    table_oid,
                    table_name: table_name.to_string(),
                    column_id: i as i16 + 1,
                    column_name: column_name.to_string(),
                    not_null: *not_null,
                });
            }
        }
        self
    }

    /// Add a `pg_type` row
    pub fn with_type(self, oid: u32, typname: &str) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.types.push((oid, typname.to_string()));
        }
        self
    }

    /// Script a successful describe
    pub fn with_describe(self, sql: &str, columns: Option<Vec<DescribedColumn>>) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.describes.insert(sql.to_string(), Ok(columns));
        }
        self
    }

    /// Script a describe rejected by the engine
    pub fn with_describe_error(self, sql: &str, error: PostgreSqlError) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.describes.insert(sql.to_string(), Err(error));
        }
        self
    }

    /// Fail any executed statement containing `pattern`
    pub fn with_statement_failure(self, pattern: &str, error: PostgreSqlError) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.failures.push((pattern.to_string(), error));
        }
        self
    }

    /// Oid to assign when a view of this name is created
    pub fn with_view_oid(self, view_name: &str, oid: u32) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            state.view_oids.insert(view_name.to_string(), oid);
        }
        self
    }

    /// Script a describe after construction
    pub async fn add_describe(&self, sql: &str, columns: Option<Vec<DescribedColumn>>) {
        self.state.write().await.describes.insert(sql.to_string(), Ok(columns));
    }

    /// Remove all scripted statement failures
    pub async fn clear_failures(&self) {
        self.state.write().await.failures.clear();
    }

    /// Statements passed to `execute`, in order
    pub async fn executed(&self) -> Vec<String> {
        self.state.read().await.executed.clone()
    }

    /// Statements passed to `describe`, in order
    pub async fn described(&self) -> Vec<String> {
        self.state.read().await.described.clone()
    }

    /// Forget the executed and described logs
    pub async fn clear_log(&self) {
        let mut state = self.state.write().await;
        state.executed.clear();
        state.described.clear();
    }

    /// Names of the views currently live
    pub async fn live_view_names(&self) -> Vec<String> {
        self.state.read().await.views.iter().map(|v| v.view_name.clone()).collect()
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    async fn check_connection(&self) -> Result<(), DbError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(DbError::Connection("Simulated connection failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn quoted_name(rest: &str) -> Option<(&str, &str)> {
    let end = rest.find('"')?;
    Some((&rest[..end], &rest[end + 1..]))
}

#[async_trait::async_trait]
impl DbConnection for MockConnection {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn describe(&self, sql: &str) -> Result<Option<Vec<DescribedColumn>>, DbError> {
        self.check_connection().await?;

        let mut state = self.state.write().await;
        state.described.push(sql.to_string());

        let scripted = state.describes.get(sql).or_else(|| {
            state
                .describes
                .iter()
                .filter(|(key, _)| sql.contains(key.as_str()))
                .max_by_key(|(key, _)| key.len())
                .map(|(_, result)| result)
        });

        match scripted {
            Some(Ok(columns)) => Ok(columns.clone()),
            Some(Err(error)) => Err(DbError::Sql(error.clone())),
            None => Err(DbError::Sql(
                PostgreSqlError::new("42601", "syntax error").with_position(1),
            )),
        }
    }

    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        self.check_connection().await?;

        let mut state = self.state.write().await;
        state.executed.push(sql.to_string());

        if let Some((_, error)) = state.failures.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(DbError::Sql(error.clone()));
        }

        if let Some((name, rest)) = sql.strip_prefix(CREATE_VIEW_PREFIX).and_then(quoted_name) {
            let definition = rest.strip_prefix(" AS ").unwrap_or(rest).to_string();
            let name = name.to_string();

            let scripted_oid = state.view_oids.get(&name).copied();
            let view_oid = match scripted_oid {
                Some(oid) => oid,
                None => {
                    let oid = state.next_view_oid;
                    state.next_view_oid += 1;
                    oid
                }
            };

            state.views.retain(|v| v.view_name != name);
            state.views.push(ViewDefinitionRow {
                view_oid,
                view_name: name,
                definition,
            });
        } else if let Some((name, _)) = sql.strip_prefix(DROP_VIEW_PREFIX).and_then(quoted_name) {
            let name = name.to_string();
            state.views.retain(|v| v.view_name != name);
        } else if sql.contains("DROP SCHEMA public CASCADE") {
            state.views.clear();
        }

        Ok(())
    }

    async fn table_columns(&self) -> Result<Vec<TableColumnRow>, DbError> {
        self.check_connection().await?;
        Ok(self.state.read().await.tables.clone())
    }

    async fn type_names(&self) -> Result<Vec<(u32, String)>, DbError> {
        self.check_connection().await?;
        Ok(self.state.read().await.types.clone())
    }

    async fn view_definitions(&self) -> Result<Vec<ViewDefinitionRow>, DbError> {
        self.check_connection().await?;
        Ok(self.state.read().await.views.clone())
    }

    async fn test_connection(&self) -> Result<(), DbError> {
        self.check_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_describe_exact_and_contained() {
        let conn = MockConnection::new()
            .with_describe("SELECT 1", Some(vec![DescribedColumn::new("one", 23)]))
            .with_describe("FROM person", Some(vec![DescribedColumn::new("id", 23)]));

        let exact = conn.describe("SELECT 1").await.unwrap().unwrap();
        assert_eq!(exact[0].name, "one");

        let contained = conn.describe("SELECT id FROM person WHERE true").await.unwrap().unwrap();
        assert_eq!(contained[0].name, "id");

        assert_eq!(conn.described().await.len(), 2);
    }

    #[tokio::test]
    async fn unscripted_describe_is_sql_error() {
        let conn = MockConnection::new();
        let err = conn.describe("SELEC 1").await.unwrap_err();
        assert!(err.as_sql_error().is_some());
    }

    #[tokio::test]
    async fn views_follow_executed_statements() {
        let conn = MockConnection::new().with_view_oid("view_a", 777);

        conn.execute("CREATE OR REPLACE VIEW \"view_a\" AS SELECT 1 AS one").await.unwrap();
        conn.execute("CREATE OR REPLACE VIEW \"view_b\" AS SELECT 2 AS two").await.unwrap();

        let views = conn.view_definitions().await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].view_oid, 777);
        assert_eq!(views[0].definition, "SELECT 1 AS one");
        assert_eq!(views[1].view_oid, FIRST_VIEW_OID);

        conn.execute("DROP VIEW IF EXISTS \"view_a\"").await.unwrap();
        assert_eq!(conn.live_view_names().await, vec!["view_b".to_string()]);

        conn.execute("DROP SCHEMA public CASCADE; CREATE SCHEMA public").await.unwrap();
        assert!(conn.live_view_names().await.is_empty());
    }

    #[tokio::test]
    async fn scripted_statement_failure() {
        let conn = MockConnection::new().with_statement_failure(
            "CREATE TABLE broken",
            PostgreSqlError::new("42601", "syntax error at end of input").with_position(20),
        );

        assert!(conn.execute("CREATE TABLE ok (id int)").await.is_ok());

        let err = conn.execute("CREATE TABLE broken (").await.unwrap_err();
        assert_eq!(err.as_sql_error().and_then(|e| e.position), Some(20));
        assert_eq!(conn.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn connection_failure() {
        let conn = MockConnection::new().with_connection_failure();
        assert!(matches!(conn.test_connection().await, Err(DbError::Connection(_))));
        assert!(matches!(conn.table_columns().await, Err(DbError::Connection(_))));
    }

    #[tokio::test]
    async fn tables_are_numbered_from_one() {
        let conn = MockConnection::new().with_table(100, "person", &[("id", true), ("name", false)]);
        let columns = conn.table_columns().await.unwrap();

        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].column_id, 2);
        assert!(!columns[1].not_null);
    }
}
