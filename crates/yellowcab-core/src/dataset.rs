//! Conversion of polars frames into SQL-typed column batches.

use std::collections::HashSet;
use std::io::Cursor;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::{PipelineError, Result};

pub fn read_parquet(bytes: &[u8]) -> Result<DataFrame> {
    let frame = ParquetReader::new(Cursor::new(bytes)).finish()?;
    Ok(frame)
}

/// Lowercases every column name in place.
pub fn lowercase_columns(frame: &mut DataFrame) -> Result<()> {
    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|name| name.to_lowercase())
        .collect();

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(PipelineError::ColumnCollision(name.clone()));
        }
    }

    frame.set_column_names(names)?;
    Ok(())
}

/// Double-quotes a SQL identifier, rejecting empty names and NUL bytes.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') || name.len() > 63 {
        return Err(PipelineError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    BigInt(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
    Date(Vec<Option<NaiveDate>>),
}

impl ColumnValues {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnValues::BigInt(_) => "BIGINT",
            ColumnValues::Double(_) => "DOUBLE PRECISION",
            ColumnValues::Boolean(_) => "BOOLEAN",
            ColumnValues::Text(_) => "TEXT",
            ColumnValues::Timestamp(_) => "TIMESTAMP",
            ColumnValues::Date(_) => "DATE",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::BigInt(v) => v.len(),
            ColumnValues::Double(v) => v.len(),
            ColumnValues::Boolean(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
            ColumnValues::Timestamp(v) => v.len(),
            ColumnValues::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell(&self, row: usize) -> Cell {
        match self {
            ColumnValues::BigInt(v) => v[row].map_or(Cell::Null, Cell::BigInt),
            ColumnValues::Double(v) => v[row].map_or(Cell::Null, Cell::Double),
            ColumnValues::Boolean(v) => v[row].map_or(Cell::Null, Cell::Boolean),
            ColumnValues::Text(v) => v[row].clone().map_or(Cell::Null, Cell::Text),
            ColumnValues::Timestamp(v) => v[row].map_or(Cell::Null, Cell::Timestamp),
            ColumnValues::Date(v) => v[row].map_or(Cell::Null, Cell::Date),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchColumn {
    pub name: String,
    pub values: ColumnValues,
}

/// Column-oriented rows ready to be written to a SQL table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBatch {
    columns: Vec<BatchColumn>,
    rows: usize,
}

impl TableBatch {
    pub fn from_frame(frame: &DataFrame) -> Result<Self> {
        let columns = frame
            .get_columns()
            .iter()
            .map(|column| {
                let series = column.as_materialized_series();
                Ok(BatchColumn {
                    name: series.name().to_string(),
                    values: convert_series(series)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            columns,
            rows: frame.height(),
        })
    }

    pub fn columns(&self) -> &[BatchColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&BatchColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn row(&self, index: usize) -> Vec<Cell> {
        self.columns
            .iter()
            .map(|column| column.values.cell(index))
            .collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement matching the batch's columns.
    pub fn create_table_sql(&self, table: &str) -> Result<String> {
        let definitions = self
            .columns
            .iter()
            .map(|column| {
                Ok(format!("{} {}", quote_ident(&column.name)?, column.values.sql_type()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table)?,
            definitions.join(", ")
        ))
    }
}

fn convert_series(series: &Series) -> Result<ColumnValues> {
    let values = match series.dtype() {
        DataType::Boolean => ColumnValues::Boolean(series.bool()?.into_iter().collect()),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let cast = series.cast(&DataType::Int64)?;
            ColumnValues::BigInt(cast.i64()?.into_iter().collect())
        }
        DataType::Float32 | DataType::Float64 => {
            let cast = series.cast(&DataType::Float64)?;
            ColumnValues::Double(cast.f64()?.into_iter().collect())
        }
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let raw = series.cast(&DataType::Int64)?;
            ColumnValues::Timestamp(
                raw.i64()?
                    .into_iter()
                    .map(|value| value.and_then(|v| timestamp_from(v, unit)))
                    .collect(),
            )
        }
        DataType::Date => {
            let raw = series.cast(&DataType::Int32)?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| PipelineError::Processing("invalid epoch".into()))?;
            ColumnValues::Date(
                raw.i32()?
                    .into_iter()
                    .map(|days| {
                        days.and_then(|d| {
                            epoch.checked_add_signed(chrono::Duration::days(d.into()))
                        })
                    })
                    .collect(),
            )
        }
        DataType::String => ColumnValues::Text(
            series
                .str()?
                .into_iter()
                .map(|value| value.map(str::to_string))
                .collect(),
        ),
        _ => {
            let cast = series.cast(&DataType::String)?;
            ColumnValues::Text(
                cast.str()?
                    .into_iter()
                    .map(|value| value.map(str::to_string))
                    .collect(),
            )
        }
    };
    Ok(values)
}

fn timestamp_from(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let datetime = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    datetime.map(|dt| dt.naive_utc())
}
