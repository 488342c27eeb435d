//! Appends extracts to the warehouse table, provisioning the database first.

use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::dataset::{lowercase_columns, ColumnValues, TableBatch};
use crate::db::{Provisioner, ReplaceWindow, TableSink};
use crate::error::{PipelineError, Result};
use crate::period::Period;

/// Column the trip extracts are windowed on when replacing a period.
pub const DEFAULT_WINDOW_COLUMN: &str = "tpep_pickup_datetime";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoadMode {
    /// Re-running a load duplicates its rows.
    #[default]
    Append,
    /// Rows of `column` inside `period` are deleted before the insert.
    ReplaceWindow { column: String, period: Period },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub database: String,
    pub table: String,
    pub rows: u64,
    pub mode: LoadMode,
    pub database_created: bool,
}

pub struct WarehouseLoader<'a> {
    provisioner: &'a dyn Provisioner,
    sink: &'a dyn TableSink,
    database: String,
}

impl<'a> WarehouseLoader<'a> {
    pub fn new(
        provisioner: &'a dyn Provisioner,
        sink: &'a dyn TableSink,
        database: impl Into<String>,
    ) -> Self {
        Self {
            provisioner,
            sink,
            database: database.into(),
        }
    }

    pub async fn load(
        &self,
        mut frame: DataFrame,
        table: &str,
        mode: LoadMode,
    ) -> Result<LoadReport> {
        lowercase_columns(&mut frame)?;
        let batch = TableBatch::from_frame(&frame)?;
        let window = replace_window(&batch, &mode)?;

        let database_created = self.ensure_database().await?;

        match self
            .sink
            .write(&self.database, table, &batch, window.as_ref())
            .await
        {
            Ok(rows) => {
                info!(
                    database = %self.database,
                    table,
                    rows,
                    database_created,
                    "warehouse load committed"
                );
                Ok(LoadReport {
                    database: self.database.clone(),
                    table: table.to_string(),
                    rows,
                    mode,
                    database_created,
                })
            }
            Err(err) => {
                error!(database = %self.database, table, error = %err, "warehouse load failed");
                if database_created {
                    self.compensate().await;
                }
                Err(err)
            }
        }
    }

    async fn ensure_database(&self) -> Result<bool> {
        if self.provisioner.database_exists(&self.database).await? {
            return Ok(false);
        }
        self.provisioner.create_database(&self.database).await?;
        info!(database = %self.database, "warehouse database created");
        Ok(true)
    }

    async fn compensate(&self) {
        warn!(database = %self.database, "dropping database created by the failed load");
        if let Err(err) = self.provisioner.drop_database(&self.database).await {
            error!(
                database = %self.database,
                error = %err,
                "could not drop database after failed load"
            );
        }
    }
}

fn replace_window(batch: &TableBatch, mode: &LoadMode) -> Result<Option<ReplaceWindow>> {
    let LoadMode::ReplaceWindow { column, period } = mode else {
        return Ok(None);
    };

    let column = column.to_lowercase();
    match batch.column(&column).map(|found| &found.values) {
        Some(ColumnValues::Timestamp(_)) => {}
        Some(other) => {
            return Err(PipelineError::Processing(format!(
                "window column \"{column}\" is {} rather than TIMESTAMP",
                other.sql_type()
            )))
        }
        None => {
            return Err(PipelineError::Processing(format!(
                "window column \"{column}\" is not present in the extract"
            )))
        }
    }

    let (start, end) = period.window();
    Ok(Some(ReplaceWindow { column, start, end }))
}
