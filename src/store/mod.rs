//! Query store port
//!
//! Executes SQL and describes the schema. The storage engine itself is
//! external; `sqlite` provides the bundled implementation.

use crate::error::QueryError;
use crate::models::{RowSet, SchemaDescription};
use crate::Result;
use async_trait::async_trait;

pub mod sqlite;
pub use sqlite::SqliteQueryStore;

#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Run one statement. Errors carry the engine's literal diagnostic.
    async fn execute(&self, sql: &str) -> std::result::Result<RowSet, QueryError>;

    async fn describe_schema(&self) -> Result<SchemaDescription>;
}
