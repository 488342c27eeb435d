pub mod dashboard;
pub mod ingest;
pub mod mart;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use yellowcab_bucket::S3BucketStore;
use yellowcab_core::config::ObjectStoreConfig;
use yellowcab_core::gateway::ObjectStoreGateway;
use yellowcab_core::PipelineError;

pub(crate) async fn gateway(config: &ObjectStoreConfig) -> Result<ObjectStoreGateway> {
    let store = S3BucketStore::new(config.s3.clone())
        .await
        .map_err(PipelineError::from)
        .context("failed to configure the object store client")?;
    Ok(ObjectStoreGateway::new(Arc::new(store)))
}

/// Reports go to stdout as JSON; logs go through tracing.
pub(crate) fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
