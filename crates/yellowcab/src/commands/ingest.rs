use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;
use yellowcab_core::config::PipelineConfig;
use yellowcab_core::db::PgServer;
use yellowcab_core::pipeline::{default_backfill_year, LoadPlan, Pipeline};
use yellowcab_core::source::HttpExtractSource;
use yellowcab_core::warehouse::WarehouseLoader;

use super::{gateway, print_report};

pub async fn extract(
    config: &PipelineConfig,
    today: NaiveDate,
    save_to: Option<&Path>,
) -> Result<()> {
    let source = HttpExtractSource::new(&config.source)?;
    let store = config.object_store()?;
    let gateway = gateway(store).await?;
    let pipeline = Pipeline::new(&source, &gateway, &store.extract_bucket, &store.archive_bucket)
        .with_max_lookback(config.source.max_lookback);

    let report = pipeline
        .extract_latest(today, save_to)
        .await
        .context("latest-month extraction failed")?;
    print_report(&report)
}

pub async fn backfill(config: &PipelineConfig, year: Option<i32>, today: NaiveDate) -> Result<()> {
    let source = HttpExtractSource::new(&config.source)?;
    let store = config.object_store()?;
    let gateway = gateway(store).await?;
    let pipeline = Pipeline::new(&source, &gateway, &store.extract_bucket, &store.archive_bucket);

    let year = year.unwrap_or_else(|| default_backfill_year(today));
    info!(year, bucket = %store.archive_bucket, "backfill started");
    let report = pipeline
        .backfill_year(year, today)
        .await
        .with_context(|| format!("backfill of {year} failed"))?;
    print_report(&report)
}

pub async fn archive(config: &PipelineConfig, dir: &Path) -> Result<()> {
    let source = HttpExtractSource::new(&config.source)?;
    let store = config.object_store()?;
    let gateway = gateway(store).await?;
    let pipeline = Pipeline::new(&source, &gateway, &store.extract_bucket, &store.archive_bucket);

    let report = pipeline
        .archive_directory(dir)
        .await
        .with_context(|| format!("archiving {} failed", dir.display()))?;
    print_report(&report)
}

pub async fn load(
    config: &PipelineConfig,
    bucket: Option<String>,
    key: Option<&str>,
    plan: &LoadPlan,
) -> Result<()> {
    let source = HttpExtractSource::new(&config.source)?;
    let store = config.object_store()?;
    let warehouse = config.warehouse()?;
    let gateway = gateway(store).await?;
    let pipeline = Pipeline::new(&source, &gateway, &store.extract_bucket, &store.archive_bucket);

    let server = PgServer::from_config(&warehouse.database);
    let loader = WarehouseLoader::new(&server, &server, warehouse.database.database.clone());
    let bucket = bucket.unwrap_or_else(|| store.archive_bucket.clone());

    let reports = pipeline
        .load_bucket(&loader, &warehouse.table, &bucket, key, plan)
        .await
        .with_context(|| format!("loading bucket {bucket} failed"))?;
    print_report(&reports)
}

pub async fn run(config: &PipelineConfig, today: NaiveDate, plan: &LoadPlan) -> Result<()> {
    let source = HttpExtractSource::new(&config.source)?;
    let store = config.object_store()?;
    let warehouse = config.warehouse()?;
    let gateway = gateway(store).await?;
    let pipeline = Pipeline::new(&source, &gateway, &store.extract_bucket, &store.archive_bucket)
        .with_max_lookback(config.source.max_lookback);

    let server = PgServer::from_config(&warehouse.database);
    let loader = WarehouseLoader::new(&server, &server, warehouse.database.database.clone());

    let report = pipeline
        .run(&loader, &warehouse.table, today, plan)
        .await
        .context("extract and load run failed")?;
    print_report(&report)
}
