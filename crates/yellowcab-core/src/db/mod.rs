//! Database backends shared by the warehouse loader, the mart builder and the
//! quality gate.

mod memory;
mod postgres;

pub use memory::MemoryServer;
pub use postgres::PgServer;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};

use crate::dataset::TableBatch;
use crate::error::Result;

pub type DbPool = Pool<Postgres>;

/// Pool on one database; short-lived, closed by the caller after use.
pub(crate) async fn connect_with(options: PgConnectOptions) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Rows of `column` falling in `[start, end)` are replaced by the new batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceWindow {
    pub column: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Server-level operations issued through the administrative database.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn database_exists(&self, database: &str) -> Result<bool>;
    async fn create_database(&self, database: &str) -> Result<()>;
    async fn drop_database(&self, database: &str) -> Result<()>;
}

#[async_trait]
pub trait TableSink: Send + Sync {
    /// Creates the table if needed, applies the optional window delete and
    /// inserts every row, all in one transaction. Returns rows inserted.
    async fn write(
        &self,
        database: &str,
        table: &str,
        batch: &TableBatch,
        replace: Option<&ReplaceWindow>,
    ) -> Result<u64>;

    async fn row_count(&self, database: &str, table: &str) -> Result<i64>;
}

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Runs a multi-statement script in a single transaction.
    async fn run_script(&self, database: &str, name: &str, sql: &str) -> Result<()>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn ping(&self, database: &str) -> Result<()>;
    async fn relation_exists(&self, database: &str, table: &str) -> Result<bool>;
}
