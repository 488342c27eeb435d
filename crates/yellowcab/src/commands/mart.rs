use anyhow::{bail, Context, Result};
use tracing::warn;
use yellowcab_core::config::PipelineConfig;
use yellowcab_core::db::PgServer;
use yellowcab_core::mart::{MartBuilder, MartScripts, MART_TABLES};
use yellowcab_core::quality::{run_suite, DataQualityGate, QualityFiles, SodaRunner, SuiteReport};
use yellowcab_core::source::HttpExtractSource;
use yellowcab_core::zones::load_zone_lookup;

use super::print_report;

pub async fn create(config: &PipelineConfig, seed: bool) -> Result<()> {
    let mart = config.mart()?;
    let scripts = MartScripts::load(mart.sql_dir.as_deref())
        .await
        .context("failed to read mart scripts")?;
    let server = PgServer::from_config(&mart.database);

    let report = MartBuilder::new(&server, &server, mart.database.database.clone(), scripts)
        .create(seed)
        .await
        .context("data mart creation failed")?;
    print_report(&report)
}

pub async fn zones(config: &PipelineConfig) -> Result<()> {
    let mart = config.mart()?;
    let source = HttpExtractSource::new(&config.source)?;
    let pool = PgServer::from_config(&mart.database)
        .pool(&mart.database.database)
        .await?;

    let result = load_zone_lookup(&source, &pool).await;
    pool.close().await;
    let report = result.context("zone lookup load failed")?;
    print_report(&report)
}

pub async fn quality(config: &PipelineConfig) -> Result<()> {
    let mart = config.mart()?;
    let files = QualityFiles::verify(&config.quality.soda_dir, &MART_TABLES)?;
    let server = PgServer::from_config(&mart.database);
    let runner = SodaRunner::new(&config.quality);
    let mut gate = DataQualityGate::new(&server, mart.database.database.clone(), &MART_TABLES);

    let report = run_suite(&mut gate, &files, &runner).await?;
    print_report(&report)?;

    match &report {
        SuiteReport::Skipped { .. } => {
            warn!("quality suite skipped by the gate");
            Ok(())
        }
        SuiteReport::Ran { .. } if report.all_passed() => Ok(()),
        SuiteReport::Ran { .. } => bail!("one or more quality checks failed"),
    }
}
