use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{connect_with, Catalog, DbPool, Provisioner, ReplaceWindow, ScriptRunner, TableSink};
use crate::config::{DatabaseConfig, ADMIN_DATABASE};
use crate::dataset::{quote_ident, ColumnValues, TableBatch};
use crate::error::Result;

const MAX_BIND_PARAMETERS: usize = 65_535;

/// A PostgreSQL server reached with one set of credentials; every call opens
/// a short-lived pool on the database it targets.
#[derive(Debug, Clone)]
pub struct PgServer {
    options: PgConnectOptions,
}

impl PgServer {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(config.admin_options())
    }

    pub async fn pool(&self, database: &str) -> Result<DbPool> {
        connect_with(self.options.clone().database(database)).await
    }
}

#[async_trait]
impl Provisioner for PgServer {
    async fn database_exists(&self, database: &str) -> Result<bool> {
        let pool = self.pool(ADMIN_DATABASE).await?;
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(database)
            .fetch_optional(&pool)
            .await?;
        pool.close().await;
        Ok(found.is_some())
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        let pool = self.pool(ADMIN_DATABASE).await?;
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(database)?))
            .execute(&pool)
            .await?;
        pool.close().await;
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        let pool = self.pool(ADMIN_DATABASE).await?;
        sqlx::query(&format!(
            "DROP DATABASE IF EXISTS {} WITH (FORCE)",
            quote_ident(database)?
        ))
        .execute(&pool)
        .await?;
        pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl TableSink for PgServer {
    async fn write(
        &self,
        database: &str,
        table: &str,
        batch: &TableBatch,
        replace: Option<&ReplaceWindow>,
    ) -> Result<u64> {
        let table_ident = quote_ident(table)?;
        let column_list = batch
            .columns()
            .iter()
            .map(|column| quote_ident(&column.name))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let pool = self.pool(database).await?;
        let mut tx = pool.begin().await?;

        sqlx::query(&batch.create_table_sql(table)?)
            .execute(&mut *tx)
            .await?;

        if let Some(window) = replace {
            let deleted = sqlx::query(&format!(
                "DELETE FROM {table_ident} WHERE {column} >= $1 AND {column} < $2",
                column = quote_ident(&window.column)?
            ))
            .bind(window.start)
            .bind(window.end)
            .execute(&mut *tx)
            .await?;
            info!(table, rows = deleted.rows_affected(), "replaced window rows deleted");
        }

        let chunk_rows = (MAX_BIND_PARAMETERS / batch.columns().len().max(1)).max(1);
        let mut inserted = 0u64;
        let mut start = 0;
        while start < batch.row_count() {
            let end = (start + chunk_rows).min(batch.row_count());
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table_ident} ({column_list}) "));
            builder.push_values(start..end, |mut row_builder, row| {
                for column in batch.columns() {
                    match &column.values {
                        ColumnValues::BigInt(values) => {
                            row_builder.push_bind(values[row]);
                        }
                        ColumnValues::Double(values) => {
                            row_builder.push_bind(values[row]);
                        }
                        ColumnValues::Boolean(values) => {
                            row_builder.push_bind(values[row]);
                        }
                        ColumnValues::Text(values) => {
                            row_builder.push_bind(values[row].as_deref());
                        }
                        ColumnValues::Timestamp(values) => {
                            row_builder.push_bind(values[row]);
                        }
                        ColumnValues::Date(values) => {
                            row_builder.push_bind(values[row]);
                        }
                    }
                }
            });
            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
            debug!(table, start, end, "inserted chunk");
            start = end;
        }

        tx.commit().await?;
        pool.close().await;
        Ok(inserted)
    }

    async fn row_count(&self, database: &str, table: &str) -> Result<i64> {
        let pool = self.pool(database).await?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&pool)
            .await?;
        pool.close().await;
        Ok(count)
    }
}

#[async_trait]
impl ScriptRunner for PgServer {
    async fn run_script(&self, database: &str, name: &str, sql: &str) -> Result<()> {
        let pool = self.pool(database).await?;
        let mut tx = pool.begin().await?;
        // A bare &str uses the simple-query protocol, so multi-statement scripts run as-is.
        sqlx::Executor::execute(&mut *tx, sql).await?;
        tx.commit().await?;
        debug!(database, script = name, "script committed");
        pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl Catalog for PgServer {
    async fn ping(&self, database: &str) -> Result<()> {
        let pool = self.pool(database).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        pool.close().await;
        Ok(())
    }

    async fn relation_exists(&self, database: &str, table: &str) -> Result<bool> {
        let pool = self.pool(database).await?;
        let relation: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(format!("public.{table}"))
            .fetch_one(&pool)
            .await?;
        pool.close().await;
        Ok(relation.is_some())
    }
}
