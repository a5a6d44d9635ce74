//! PostgreSQL connection using tokio-postgres
//!
//! Two ways to obtain a connection:
//! 1. Connect directly to an existing database (`PostgresConnection::connect`)
//! 2. Create a dedicated blank check database on a local cluster
//!    (`PostgresConnection::create_check_database`) and connect to it.
//!    The admin URL must point to `localhost`; the check database is
//!    dropped again by `close()`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let conn = PostgresConnection::create_check_database(
//!     "postgres://postgres@localhost:5432/postgres",
//!     None,
//!     false,
//! ).await?;
//!
//! let columns = conn.describe("SELECT 1 AS one").await?;
//! conn.close().await?;
//! ```

use crate::connection::{DbConnection, DbError, DescribedColumn, TableColumnRow, ViewDefinitionRow};
use sha2::{Digest, Sha256};
use sqlcheck_core::PostgreSqlError;

use tokio_postgres::config::Host;
use tokio_postgres::error::ErrorPosition;
use tokio_postgres::{Client, Config as PgConfig, NoTls};

use postgres_native_tls::MakeTlsConnector;
use native_tls::TlsConnector;

/// Check database created on an admin connection
struct CheckDatabase {
    admin: Client,
    name: String,
}

/// PostgreSQL connection
pub struct PostgresConnection {
    client: Client,

    /// Database the client is connected to
    database: String,

    /// Set when this connection owns a dedicated check database
    check_database: Option<CheckDatabase>,
}

impl PostgresConnection {
    /// Connect to an existing database on a local cluster
    ///
    /// The first pass resets the `public` schema, so remote hosts are refused
    /// before any connection is attempted.
    pub async fn connect(url: &str, tls: bool) -> Result<Self, DbError> {
        let config: PgConfig = url
            .parse()
            .map_err(|e| DbError::Config(format!("Invalid connection string: {}", e)))?;

        ensure_localhost(&config)?;

        let database = config.get_dbname().unwrap_or("postgres").to_string();
        let client = connect_config(&config, tls).await?;

        Ok(Self {
            client,
            database,
            check_database: None,
        })
    }

    /// Create a blank check database on `admin_url` and connect to it
    ///
    /// An existing database of the same name is dropped first, after its
    /// backends are terminated. Without `database_name` a random
    /// `sqlcheck_test_<hex>` name is used.
    pub async fn create_check_database(
        admin_url: &str,
        database_name: Option<&str>,
        tls: bool,
    ) -> Result<Self, DbError> {
        let admin_config: PgConfig = admin_url
            .parse()
            .map_err(|e| DbError::Config(format!("Invalid connection string: {}", e)))?;

        ensure_localhost(&admin_config)?;

        let name = database_name
            .map(str::to_string)
            .unwrap_or_else(random_database_name);

        let admin = connect_config(&admin_config, tls).await?;

        drop_database(&admin, &name).await?;

        tracing::info!(database = %name, "creating check database");
        admin
            .batch_execute(&format!(
                "CREATE DATABASE {} WITH TEMPLATE template0",
                quote_ident(&name)
            ))
            .await
            .map_err(map_error)?;

        let mut config = admin_config.clone();
        config.dbname(&name);
        let client = connect_config(&config, tls).await?;

        Ok(Self {
            client,
            database: name.clone(),
            check_database: Some(CheckDatabase { admin, name }),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Release the connection, dropping the check database if one was created
    pub async fn close(self) -> Result<(), DbError> {
        let Self { client, check_database, .. } = self;
        drop(client);

        if let Some(CheckDatabase { admin, name }) = check_database {
            tracing::info!(database = %name, "dropping check database");
            drop_database(&admin, &name).await?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl DbConnection for PostgresConnection {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn describe(&self, sql: &str) -> Result<Option<Vec<DescribedColumn>>, DbError> {
        let statement = self.client.prepare(sql).await.map_err(map_error)?;

        if statement.columns().is_empty() {
            return Ok(None);
        }

        let columns = statement
            .columns()
            .iter()
            .map(|column| DescribedColumn {
                name: column.name().to_string(),
                type_oid: column.type_().oid(),
                table_oid: column.table_oid().unwrap_or(0),
                column_id: column.column_id().unwrap_or(0),
            })
            .collect();

        Ok(Some(columns))
    }

    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        self.client.batch_execute(sql).await.map_err(map_error)
    }

    async fn table_columns(&self) -> Result<Vec<TableColumnRow>, DbError> {
        let query = r#"
            SELECT c.oid, c.relname::text, a.attnum, a.attname::text, a.attnotnull
            FROM pg_attribute a
            INNER JOIN pg_class c ON c.oid = a.attrelid
            WHERE c.relkind = 'r'
              AND a.attnum > 0
              AND NOT a.attisdropped
        "#;

        let rows = self.client.query(query, &[]).await.map_err(map_error)?;

        rows.iter()
            .map(|row| {
                Ok(TableColumnRow {
                    table_oid: row.try_get(0).map_err(invalid_response)?,
                    table_name: row.try_get(1).map_err(invalid_response)?,
                    column_id: row.try_get(2).map_err(invalid_response)?,
                    column_name: row.try_get(3).map_err(invalid_response)?,
                    not_null: row.try_get(4).map_err(invalid_response)?,
                })
            })
            .collect()
    }

    async fn type_names(&self) -> Result<Vec<(u32, String)>, DbError> {
        let rows = self
            .client
            .query("SELECT oid, typname::text FROM pg_type", &[])
            .await
            .map_err(map_error)?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get(0).map_err(invalid_response)?,
                    row.try_get(1).map_err(invalid_response)?,
                ))
            })
            .collect()
    }

    async fn view_definitions(&self) -> Result<Vec<ViewDefinitionRow>, DbError> {
        let query = r#"
            SELECT c.oid, c.relname::text, pg_get_viewdef(c.oid)
            FROM pg_class c
            INNER JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'v'
              AND n.nspname = 'public'
        "#;

        let rows = self.client.query(query, &[]).await.map_err(map_error)?;

        rows.iter()
            .map(|row| {
                Ok(ViewDefinitionRow {
                    view_oid: row.try_get(0).map_err(invalid_response)?,
                    view_name: row.try_get(1).map_err(invalid_response)?,
                    definition: row.try_get(2).map_err(invalid_response)?,
                })
            })
            .collect()
    }

    async fn test_connection(&self) -> Result<(), DbError> {
        self.client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| DbError::Connection(format!("Connection test failed: {}", e)))?;
        Ok(())
    }
}

/// Connect with or without TLS and spawn the connection task
async fn connect_config(config: &PgConfig, tls: bool) -> Result<Client, DbError> {
    let database = config.get_dbname().unwrap_or("postgres").to_string();

    if tls {
        let connector = TlsConnector::builder()
            .build()
            .map_err(|e| DbError::Config(format!("Failed to create TLS connector: {}", e)))?;

        let (client, connection) = config
            .connect(MakeTlsConnector::new(connector))
            .await
            .map_err(|e| DbError::Connection(format!("Failed to connect with TLS: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(database = %database, "PostgreSQL TLS connection error: {}", e);
            }
        });

        Ok(client)
    } else {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| DbError::Connection(format!("Failed to connect: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(database = %database, "PostgreSQL connection error: {}", e);
            }
        });

        Ok(client)
    }
}

/// Refuse to touch anything but a local cluster
fn ensure_localhost(config: &PgConfig) -> Result<(), DbError> {
    for host in config.get_hosts() {
        let local = match host {
            Host::Tcp(name) => matches!(name.as_str(), "localhost" | "127.0.0.1" | "::1"),
            #[cfg(unix)]
            Host::Unix(_) => true,
        };

        if !local {
            return Err(DbError::Config(format!(
                "refusing to check against non-local host {:?}",
                host
            )));
        }
    }
    Ok(())
}

async fn drop_database(admin: &Client, name: &str) -> Result<(), DbError> {
    admin
        .execute(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
            &[&name],
        )
        .await
        .map_err(map_error)?;

    admin
        .batch_execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
        .await
        .map_err(map_error)
}

fn random_database_name() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seed = format!("{}:{}", std::process::id(), nanos);
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    format!("sqlcheck_test_{}", &digest[..12])
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a client error, keeping the engine's structured error when present
fn map_error(error: tokio_postgres::Error) -> DbError {
    match error.as_db_error() {
        Some(db) => {
            let mut err = PostgreSqlError::new(db.code().code(), db.message());
            if let Some(ErrorPosition::Original(position)) = db.position() {
                err = err.with_position(*position as usize);
            }
            if let Some(hint) = db.hint() {
                err = err.with_hint(hint);
            }
            if let Some(detail) = db.detail() {
                err = err.with_detail(detail);
            }
            DbError::Sql(err)
        }
        None => DbError::Connection(error.to_string()),
    }
}

fn invalid_response(error: tokio_postgres::Error) -> DbError {
    DbError::InvalidResponse(error.to_string())
}
