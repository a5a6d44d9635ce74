//! Integration tests for schema introspection and view column tracing
//!
//! Everything here runs against `MockConnection`. The last section talks to
//! a real server and is `#[ignore]`d; run it with
//!
//! ```bash
//! DATABASE_URL=postgres://postgres@localhost:5432/postgres \
//! cargo test -p sqlcheck-catalog --features postgres --test catalog_tests -- --ignored
//! ```

use pretty_assertions::assert_eq;
use sqlcheck_catalog::{
    ColumnKey, DbConnection, DbError, DescribedColumn, IntrospectError, MockConnection,
    SchemaIntrospector, SchemaSnapshot, UniqueColumns,
};
use sqlcheck_core::{ColNullability, ColumnType, PostgreSqlError};
use sqlcheck_sql::OuterJoinAnalysis;

const PERSON: u32 = 100;
const PET: u32 = 200;

const INT4: u32 = 23;
const TEXT: u32 = 25;

// =============================================================================
// Helper Functions
// =============================================================================

/// `person(id not null, name null)` and `pet(id not null, owner_id not null)`
fn base_connection() -> MockConnection {
    MockConnection::new()
        .with_table(PERSON, "person", &[("id", true), ("name", false)])
        .with_table(PET, "pet", &[("id", true), ("owner_id", true)])
}

async fn create_view(conn: &MockConnection, name: &str, body: &str) {
    conn.execute(&format!("CREATE OR REPLACE VIEW \"{}\" AS {}", name, body))
        .await
        .unwrap();
}

fn nullability(snapshot: &SchemaSnapshot, oid: u32, column: i16) -> ColNullability {
    snapshot
        .column_info(ColumnKey::new(oid, column))
        .unwrap()
        .nullability
}

// =============================================================================
// Table catalog
// =============================================================================

#[tokio::test]
async fn test_table_catalog_nullability() {
    let conn = base_connection();
    let tables = SchemaIntrospector::new(&conn).load_tables().await.unwrap();

    assert_eq!(tables.table_count(), 2);
    assert_eq!(tables.relation_name(PERSON), Some("person"));

    let id = tables.column(ColumnKey::new(PERSON, 1)).unwrap();
    assert_eq!(id.nullability, ColNullability::Req);

    let name = tables.column(ColumnKey::new(PERSON, 2)).unwrap();
    assert_eq!(name.nullability, ColNullability::Opt);
    assert_eq!(name.origin.as_ref().map(|o| o.column.as_str()), Some("name"));
}

#[tokio::test]
async fn test_type_table_is_normalized() {
    let conn = base_connection().with_type(90001, "citext");
    let tables = SchemaIntrospector::new(&conn).load_tables().await.unwrap();

    assert_eq!(tables.sql_type(INT4).unwrap().as_str(), "int");
    assert_eq!(tables.sql_type(1043).unwrap().as_str(), "text");
    assert_eq!(tables.sql_type(3802).unwrap().as_str(), "json");
    assert_eq!(tables.sql_type(90001).unwrap().as_str(), "citext");
    assert_eq!(tables.sql_type(1).unwrap_err(), IntrospectError::UnknownTypeOid(1));
}

#[tokio::test]
async fn test_connection_failure_propagates() {
    let conn = MockConnection::new().with_connection_failure();
    let err = SchemaIntrospector::new(&conn).snapshot().await.unwrap_err();

    assert!(matches!(err, IntrospectError::Db(DbError::Connection(_))));
}

// =============================================================================
// View tracing
// =============================================================================

#[tokio::test]
async fn test_view_over_not_null_column_is_required() {
    let conn = base_connection()
        .with_view_oid("view_people", 5000)
        .with_describe(
            "SELECT id, name FROM person",
            Some(vec![
                DescribedColumn::new("id", INT4).from_column(PERSON, 1),
                DescribedColumn::new("name", TEXT).from_column(PERSON, 2),
            ]),
        );
    create_view(&conn, "view_people", "SELECT id, name FROM person").await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();

    assert_eq!(snapshot.views().view_count(), 1);
    assert_eq!(nullability(&snapshot, 5000, 1), ColNullability::Req);
    assert_eq!(nullability(&snapshot, 5000, 2), ColNullability::Opt);

    let origin = snapshot.column_info(ColumnKey::new(5000, 1)).unwrap().origin.unwrap();
    assert_eq!((origin.table.as_str(), origin.column.as_str()), ("person", "id"));
}

#[tokio::test]
async fn test_literal_view_column_is_optional() {
    let conn = base_connection()
        .with_view_oid("view_consts", 5000)
        .with_describe(
            "SELECT 1 AS one",
            Some(vec![DescribedColumn::new("one", INT4)]),
        );
    create_view(&conn, "view_consts", "SELECT 1 AS one").await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    assert_eq!(nullability(&snapshot, 5000, 1), ColNullability::Opt);
}

#[tokio::test]
async fn test_left_joined_view_column_is_optional() {
    let body = "SELECT person.id AS person_id, pet.id AS pet_id FROM person LEFT JOIN pet ON pet.owner_id = person.id";
    let conn = base_connection()
        .with_view_oid("view_owners", 5000)
        .with_describe(
            body,
            Some(vec![
                DescribedColumn::new("person_id", INT4).from_column(PERSON, 1),
                DescribedColumn::new("pet_id", INT4).from_column(PET, 1),
            ]),
        );
    create_view(&conn, "view_owners", body).await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    assert_eq!(nullability(&snapshot, 5000, 1), ColNullability::Req);
    assert_eq!(nullability(&snapshot, 5000, 2), ColNullability::Opt);
}

#[tokio::test]
async fn test_self_joined_view_keeps_preserved_side_required() {
    let body = "SELECT a.id, b.id AS other_id FROM person a LEFT JOIN person b ON b.name = a.name";
    let conn = base_connection()
        .with_view_oid("view_pairs", 5000)
        .with_describe(
            body,
            Some(vec![
                DescribedColumn::new("id", INT4).from_column(PERSON, 1),
                DescribedColumn::new("other_id", INT4).from_column(PERSON, 1),
            ]),
        );
    create_view(&conn, "view_pairs", body).await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    assert_eq!(nullability(&snapshot, 5000, 1), ColNullability::Req);
    assert_eq!(nullability(&snapshot, 5000, 2), ColNullability::Opt);
}

#[tokio::test]
async fn test_view_over_view_follows_origin() {
    let inner = "SELECT id FROM person";
    let outer = "SELECT id FROM \"view_inner\"";
    let conn = base_connection()
        .with_view_oid("view_inner", 5000)
        .with_view_oid("view_outer", 5001)
        .with_describe(
            inner,
            Some(vec![DescribedColumn::new("id", INT4).from_column(PERSON, 1)]),
        )
        .with_describe(
            outer,
            Some(vec![DescribedColumn::new("id", INT4).from_column(5000, 1)]),
        );

    // Creation order deliberately puts the dependent view first in the catalog
    create_view(&conn, "view_outer", outer).await;
    create_view(&conn, "view_inner", inner).await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    assert_eq!(nullability(&snapshot, 5001, 1), ColNullability::Req);

    let origin = snapshot.column_info(ColumnKey::new(5001, 1)).unwrap().origin.unwrap();
    assert_eq!(origin.table, "person");
}

#[tokio::test]
async fn test_outer_join_on_inner_view_is_optional() {
    let inner = "SELECT id FROM person";
    let outer = "SELECT v.id FROM pet LEFT JOIN \"view_inner\" v ON v.id = pet.owner_id";
    let conn = base_connection()
        .with_view_oid("view_inner", 5000)
        .with_view_oid("view_outer", 5001)
        .with_describe(
            inner,
            Some(vec![DescribedColumn::new("id", INT4).from_column(PERSON, 1)]),
        )
        .with_describe(
            outer,
            Some(vec![DescribedColumn::new("id", INT4).from_column(5000, 1)]),
        );
    create_view(&conn, "view_inner", inner).await;
    create_view(&conn, "view_outer", outer).await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    assert_eq!(nullability(&snapshot, 5000, 1), ColNullability::Req);
    assert_eq!(nullability(&snapshot, 5001, 1), ColNullability::Opt);
}

#[tokio::test]
async fn test_undescribable_view_is_skipped() {
    let conn = base_connection()
        .with_view_oid("view_broken", 5000)
        .with_describe_error(
            "SELECT nope FROM person",
            PostgreSqlError::new("42703", "column \"nope\" does not exist"),
        );
    create_view(&conn, "view_broken", "SELECT nope FROM person").await;

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    assert_eq!(snapshot.views().view_count(), 0);
    assert_eq!(nullability(&snapshot, 5000, 1), ColNullability::Opt);
}

#[tokio::test]
async fn test_refresh_views_picks_up_new_views() {
    let conn = base_connection()
        .with_view_oid("view_ids", 5000)
        .with_describe(
            "SELECT id FROM pet",
            Some(vec![DescribedColumn::new("id", INT4).from_column(PET, 1)]),
        );

    let introspector = SchemaIntrospector::new(&conn);
    let before = introspector.snapshot().await.unwrap();
    assert_eq!(before.views().view_count(), 0);

    create_view(&conn, "view_ids", "SELECT id FROM pet").await;
    let after = introspector.refresh_views(&before).await.unwrap();

    assert_eq!(after.views().view_count(), 1);
    assert_eq!(after.relation_name(5000), Some("view_ids"));
    assert_eq!(after.tables().table_count(), 2);
}

// =============================================================================
// Result column typing
// =============================================================================

#[tokio::test]
async fn test_query_column_through_view_and_left_join() {
    let conn = base_connection()
        .with_view_oid("view_people", 5000)
        .with_describe(
            "SELECT id FROM person",
            Some(vec![DescribedColumn::new("id", INT4).from_column(PERSON, 1)]),
        );
    create_view(&conn, "view_people", "SELECT id FROM person").await;
    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();

    let column = DescribedColumn::new("id", INT4).from_column(5000, 1);
    let unique = UniqueColumns::default();

    let inner = OuterJoinAnalysis::from_sql("SELECT id FROM \"view_people\"").unwrap();
    assert_eq!(
        snapshot.column_type(0, &column, &inner, &unique).unwrap(),
        ColumnType::req("int")
    );

    let left = OuterJoinAnalysis::from_sql(
        "SELECT p.id FROM pet LEFT JOIN \"view_people\" p ON p.id = pet.owner_id",
    )
    .unwrap();
    assert_eq!(
        snapshot.column_type(0, &column, &left, &unique).unwrap(),
        ColumnType::opt("int")
    );
}

#[tokio::test]
async fn test_query_self_join_and_cte_keep_required_columns() {
    let snapshot = SchemaIntrospector::new(&base_connection()).snapshot().await.unwrap();
    let unique = UniqueColumns::default();

    let person_id = DescribedColumn::new("id", INT4).from_column(PERSON, 1);
    let self_join = OuterJoinAnalysis::from_sql(
        "SELECT a.id FROM person a LEFT JOIN person b ON b.id = a.id",
    )
    .unwrap();
    assert_eq!(
        snapshot.column_type(0, &person_id, &self_join, &unique).unwrap(),
        ColumnType::req("int")
    );

    let pet_id = DescribedColumn::new("id", INT4).from_column(PET, 1);
    let through_cte = OuterJoinAnalysis::from_sql(
        "WITH x AS (SELECT pet.id FROM pet) \
         SELECT pet.id FROM pet JOIN pet p2 ON true LEFT JOIN x ON x.id = pet.id",
    )
    .unwrap();
    assert_eq!(
        snapshot.column_type(0, &pet_id, &through_cte, &unique).unwrap(),
        ColumnType::req("int")
    );
}

// =============================================================================
// Live PostgreSQL
// =============================================================================

#[cfg(feature = "postgres")]
#[tokio::test]
#[ignore]
async fn test_postgres_check_database_roundtrip() {
    use sqlcheck_catalog::PostgresConnection;

    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };

    let conn = PostgresConnection::create_check_database(&url, None, false)
        .await
        .unwrap();

    conn.execute("CREATE TABLE person (id int NOT NULL, name text)")
        .await
        .unwrap();
    conn.execute("CREATE OR REPLACE VIEW \"view_people\" AS SELECT id, name FROM person")
        .await
        .unwrap();

    let snapshot = SchemaIntrospector::new(&conn).snapshot().await.unwrap();
    let columns = conn
        .describe("SELECT id, name FROM \"view_people\"")
        .await
        .unwrap()
        .unwrap();

    let analysis = OuterJoinAnalysis::default();
    let unique = UniqueColumns::default();
    assert_eq!(
        snapshot.column_type(0, &columns[0], &analysis, &unique).unwrap(),
        ColumnType::req("int")
    );
    assert_eq!(
        snapshot.column_type(1, &columns[1], &analysis, &unique).unwrap(),
        ColumnType::opt("text")
    );

    let err = conn.describe("SELECT nope FROM person").await.unwrap_err();
    assert_eq!(err.as_sql_error().map(|e| e.code.as_str()), Some("42703"));

    conn.close().await.unwrap();
}
