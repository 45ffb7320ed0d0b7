//! SQLite-backed query store
//!
//! Runs candidate SQL through a sqlx pool and introspects the schema
//! (tables, columns, foreign keys) for prompt construction.

use crate::error::{PipelineError, QueryError};
use crate::models::{
    ColumnSchema, Relationship, RowSet, SchemaDescription, SemanticAlias, TableSchema,
};
use crate::store::QueryStore;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct SqliteQueryStore {
    pool: SqlitePool,
    aliases: Vec<SemanticAlias>,
}

impl SqliteQueryStore {
    /// Connect to `database_url`. In-memory databases are pinned to a single
    /// connection that is never recycled, otherwise each pooled connection
    /// would see its own empty database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| PipelineError::Database(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| PipelineError::Database(format!("Failed to open database: {}", e)))?;

        info!(database_url, "Query store connected");

        Ok(Self {
            pool,
            aliases: Vec::new(),
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            aliases: Vec::new(),
        }
    }

    /// Register a business term the drafting prompt should understand.
    /// A later registration of the same term replaces the earlier one.
    pub fn with_alias(mut self, term: impl Into<String>, expression: impl Into<String>) -> Self {
        let term = term.into();
        self.aliases.retain(|alias| alias.term != term);
        self.aliases.push(SemanticAlias {
            term,
            expression: expression.into(),
        });
        self
    }

    /// Create and populate the demo `customers` / `transactions` tables and
    /// register the `Revenue` alias. Safe to call on an already seeded store.
    pub async fn with_demo_data(self) -> Result<Self> {
        for statement in DEMO_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| PipelineError::Database(format!("Failed to seed demo data: {}", e)))?;
        }

        debug!("Demo dataset seeded");

        Ok(self.with_alias("Revenue", "SUM(transactions.amount)"))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn column_names(&self, sql: &str) -> Vec<String> {
        match (&self.pool).prepare(sql).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(schema_error)?;

        rows.iter()
            .map(|row| {
                Ok(ColumnSchema {
                    name: row.try_get("name").map_err(schema_error)?,
                    data_type: row.try_get("type").map_err(schema_error)?,
                })
            })
            .collect()
    }

    async fn table_relationships(&self, table: &str) -> Result<Vec<Relationship>> {
        let rows = sqlx::query(
            r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(schema_error)?;

        rows.iter()
            .map(|row| {
                let from_column: String = row.try_get("from").map_err(schema_error)?;
                let to_column: Option<String> = row.try_get("to").map_err(schema_error)?;
                Ok(Relationship {
                    from_table: table.to_string(),
                    to_table: row.try_get("table").map_err(schema_error)?,
                    to_column: to_column.unwrap_or_else(|| from_column.clone()),
                    from_column,
                })
            })
            .collect()
    }
}

#[async_trait]
impl QueryStore for SqliteQueryStore {
    async fn execute(&self, sql: &str) -> std::result::Result<RowSet, QueryError> {
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&self.pool)
            .await?;

        let columns = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => self.column_names(sql).await,
        };

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            decoded.push(decode_row(row)?);
        }

        debug!(row_count = decoded.len(), column_count = columns.len(), "Query executed");

        Ok(RowSet {
            columns,
            rows: decoded,
        })
    }

    async fn describe_schema(&self) -> Result<SchemaDescription> {
        let table_names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(schema_error)?;

        let mut tables = Vec::with_capacity(table_names.len());
        let mut relationships = Vec::new();

        for name in table_names {
            let columns = self.table_columns(&name).await?;
            relationships.extend(self.table_relationships(&name).await?);
            tables.push(TableSchema { name, columns });
        }

        Ok(SchemaDescription {
            tables,
            aliases: self.aliases.clone(),
            relationships,
        })
    }
}

fn schema_error(err: sqlx::Error) -> PipelineError {
    PipelineError::Schema(err.to_string())
}

fn decode_row(row: &SqliteRow) -> std::result::Result<Vec<Value>, QueryError> {
    (0..row.len()).map(|index| decode_cell(row, index)).collect()
}

/// Decode by the value's runtime storage class; SQLite columns are not
/// strictly typed, so the declared column type is not consulted.
fn decode_cell(row: &SqliteRow, index: usize) -> std::result::Result<Value, QueryError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    let value = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            Value::String(format!("<blob {} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };

    Ok(value)
}

const DEMO_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS customers (
      customer_id INTEGER PRIMARY KEY,
      full_name TEXT NOT NULL,
      email TEXT NOT NULL,
      segment TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
      transaction_id INTEGER PRIMARY KEY,
      customer_id INTEGER NOT NULL REFERENCES customers(customer_id),
      transaction_date TEXT NOT NULL,
      product_category TEXT NOT NULL,
      amount REAL NOT NULL
    )
    "#,
    r#"
    INSERT OR IGNORE INTO customers (customer_id, full_name, email, segment) VALUES
      (101, 'Alice Johnson', 'alice.johnson@example.com', 'Enterprise'),
      (102, 'Brian Lee', 'brian.lee@example.org', 'SMB'),
      (103, 'Carla Gomez', 'carla.gomez@example.net', 'Enterprise'),
      (104, 'David Okafor', 'david.okafor@example.com', 'SMB'),
      (105, 'Emma Schultz', 'emma.schultz@example.com', 'Mid-Market'),
      (106, 'Farid Haddad', 'farid.haddad@example.org', 'SMB')
    "#,
    r#"
    INSERT OR IGNORE INTO transactions
      (transaction_id, customer_id, transaction_date, product_category, amount) VALUES
      (1, 101, '2024-01-05', 'Subscription', 1200.0),
      (2, 102, '2024-01-09', 'Add-ons', 100.0),
      (3, 103, '2024-02-11', 'Subscription', 800.0),
      (4, 104, '2024-02-20', 'Services', 450.0),
      (5, 105, '2024-03-02', 'Add-ons', 200.0),
      (6, 101, '2024-03-15', 'Services', 300.0)
    "#,
];
