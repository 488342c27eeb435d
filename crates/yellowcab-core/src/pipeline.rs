//! Pipeline stages composed from the source, the object store and the
//! warehouse loader.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::dataset::read_parquet;
use crate::error::{PipelineError, Result};
use crate::gateway::{ObjectStoreGateway, PutOutcome};
use crate::period::Period;
use crate::resolver::LatestPeriodResolver;
use crate::source::ExtractSource;
use crate::warehouse::{LoadMode, LoadReport, WarehouseLoader};

pub const PARQUET_SUFFIX: &str = ".parquet";

/// How each loaded extract is written; the window period comes from the key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadPlan {
    #[default]
    Append,
    ReplaceWindow { column: String },
}

impl LoadPlan {
    pub fn mode_for(&self, key: &str) -> Result<LoadMode> {
        match self {
            LoadPlan::Append => Ok(LoadMode::Append),
            LoadPlan::ReplaceWindow { column } => Ok(LoadMode::ReplaceWindow {
                column: column.clone(),
                period: Period::from_extract_name(key)?,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub period: Period,
    pub bucket: String,
    pub key: String,
    pub outcome: PutOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    AlreadyStored,
    NotPublished,
    Uploaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillMonth {
    pub period: Period,
    pub status: BackfillStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub year: i32,
    pub bucket: String,
    pub months: Vec<BackfillMonth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub bucket: String,
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub extract: ExtractReport,
    pub load: LoadReport,
}

pub struct Pipeline<'a> {
    source: &'a dyn ExtractSource,
    gateway: &'a ObjectStoreGateway,
    extract_bucket: String,
    archive_bucket: String,
    max_lookback: u32,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn ExtractSource,
        gateway: &'a ObjectStoreGateway,
        extract_bucket: impl Into<String>,
        archive_bucket: impl Into<String>,
    ) -> Self {
        Self {
            source,
            gateway,
            extract_bucket: extract_bucket.into(),
            archive_bucket: archive_bucket.into(),
            max_lookback: crate::resolver::DEFAULT_MAX_LOOKBACK,
        }
    }

    pub fn with_max_lookback(mut self, max_lookback: u32) -> Self {
        self.max_lookback = max_lookback;
        self
    }

    /// Stores the most recent published extract in the extraction bucket,
    /// optionally keeping a copy in `save_to`.
    pub async fn extract_latest(
        &self,
        today: NaiveDate,
        save_to: Option<&Path>,
    ) -> Result<ExtractReport> {
        let period = LatestPeriodResolver::new(self.source)
            .with_max_lookback(self.max_lookback)
            .resolve(today)
            .await?;
        let key = period.extract_name();

        let data = self.source.fetch(period).await?;
        info!(%period, bytes = data.len(), "extract downloaded");

        let saved_to = match save_to {
            Some(dir) => Some(save_local(dir, &key, &data).await?),
            None => None,
        };

        self.gateway.ensure_bucket(&self.extract_bucket).await?;
        let outcome = self.gateway.put(&self.extract_bucket, &key, data).await?;

        Ok(ExtractReport {
            period,
            bucket: self.extract_bucket.clone(),
            key,
            outcome,
            saved_to,
        })
    }

    /// Archives every published month of `year` up to the month before `today`.
    pub async fn backfill_year(&self, year: i32, today: NaiveDate) -> Result<BackfillReport> {
        let last = Period::preceding(today);
        self.gateway.ensure_bucket(&self.archive_bucket).await?;

        let mut months = Vec::new();
        for month in 1..=12 {
            let period = Period::new(year, month)?;
            if period > last {
                break;
            }
            let key = period.extract_name();

            let status = if self.gateway.exists(&self.archive_bucket, &key).await? {
                info!(%period, "already archived");
                BackfillStatus::AlreadyStored
            } else if !self.source.exists(period).await {
                warn!(%period, "extract not published");
                BackfillStatus::NotPublished
            } else {
                let data = self.source.fetch(period).await?;
                match self.gateway.put(&self.archive_bucket, &key, data).await? {
                    PutOutcome::Uploaded { .. } => BackfillStatus::Uploaded,
                    PutOutcome::Skipped => BackfillStatus::AlreadyStored,
                }
            };
            months.push(BackfillMonth { period, status });
        }

        Ok(BackfillReport {
            year,
            bucket: self.archive_bucket.clone(),
            months,
        })
    }

    /// Uploads the `.parquet` files of a local directory to the archive bucket.
    pub async fn archive_directory(&self, dir: &Path) -> Result<ArchiveReport> {
        self.gateway.ensure_bucket(&self.archive_bucket).await?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_parquet = name.to_ascii_lowercase().ends_with(PARQUET_SUFFIX);
            if is_parquet && entry.file_type().await?.is_file() {
                files.push((name, entry.path()));
            }
        }
        files.sort();

        let mut report = ArchiveReport {
            bucket: self.archive_bucket.clone(),
            uploaded: Vec::new(),
            skipped: Vec::new(),
        };
        for (name, path) in files {
            match self.gateway.put_file(&self.archive_bucket, &name, &path).await? {
                PutOutcome::Uploaded { .. } => report.uploaded.push(name),
                PutOutcome::Skipped => report.skipped.push(name),
            }
        }
        Ok(report)
    }

    /// Loads the Parquet blobs of `bucket` (all of them, or only `key`) into
    /// the warehouse, stopping at the first failure.
    pub async fn load_bucket(
        &self,
        loader: &WarehouseLoader<'_>,
        table: &str,
        bucket: &str,
        key: Option<&str>,
        plan: &LoadPlan,
    ) -> Result<Vec<LoadReport>> {
        let keys: Vec<String> = self
            .gateway
            .list_keys(bucket, PARQUET_SUFFIX)
            .await?
            .into_iter()
            .filter(|candidate| key.map_or(true, |wanted| candidate == wanted))
            .collect();

        if let (Some(wanted), true) = (key, keys.is_empty()) {
            return Err(PipelineError::Processing(format!(
                "no Parquet object named {wanted} in bucket {bucket}"
            )));
        }

        let mut reports = Vec::with_capacity(keys.len());
        for key in &keys {
            let report = self
                .load_key(loader, table, bucket, key, plan)
                .await
                .inspect_err(|err| error!(bucket, key, error = %err, "load stopped"))?;
            reports.push(report);
        }
        info!(bucket, files = reports.len(), "bucket loaded");
        Ok(reports)
    }

    async fn load_key(
        &self,
        loader: &WarehouseLoader<'_>,
        table: &str,
        bucket: &str,
        key: &str,
        plan: &LoadPlan,
    ) -> Result<LoadReport> {
        let mode = plan.mode_for(key)?;
        let data = self.gateway.get(bucket, key).await?;
        let frame = read_parquet(&data)?;
        info!(bucket, key, rows = frame.height(), "extract decoded");
        loader.load(frame, table, mode).await
    }

    /// Extracts the latest period, then loads it from the extraction bucket.
    pub async fn run(
        &self,
        loader: &WarehouseLoader<'_>,
        table: &str,
        today: NaiveDate,
        plan: &LoadPlan,
    ) -> Result<RunReport> {
        let extract = self.extract_latest(today, None).await?;
        let load = self
            .load_key(loader, table, &self.extract_bucket, &extract.key, plan)
            .await?;
        Ok(RunReport { extract, load })
    }
}

/// Year of the month before `today`, the default backfill target.
pub fn default_backfill_year(today: NaiveDate) -> i32 {
    Period::preceding(today).year()
}

async fn save_local(dir: &Path, key: &str, data: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(key);
    if tokio::fs::try_exists(&path).await? {
        info!(path = %path.display(), "local copy already present, not overwritten");
    } else {
        tokio::fs::write(&path, data).await?;
        info!(path = %path.display(), "local copy written");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_plan_takes_period_from_key() {
        let plan = LoadPlan::ReplaceWindow {
            column: "tpep_pickup_datetime".into(),
        };
        assert_eq!(
            plan.mode_for("yellow_tripdata_2024-03.parquet").unwrap(),
            LoadMode::ReplaceWindow {
                column: "tpep_pickup_datetime".into(),
                period: Period::new(2024, 3).unwrap(),
            }
        );
        assert!(plan.mode_for("zones.parquet").is_err());
        assert_eq!(
            LoadPlan::Append.mode_for("zones.parquet").unwrap(),
            LoadMode::Append
        );
    }

    #[test]
    fn backfill_defaults_to_year_of_previous_month() {
        let jan = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert_eq!(default_backfill_year(jan), 2024);
        let jun = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(default_backfill_year(jun), 2025);
    }
}
