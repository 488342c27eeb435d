use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info};
use yellowcab_bucket::{BucketStatus, BucketStore};

use crate::error::Result;

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";
const CSV_CONTENT_TYPE: &str = "text/csv";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PutOutcome {
    Uploaded { bytes: usize },
    Skipped,
}

/// At-most-once blob writes over a [`BucketStore`].
#[derive(Clone)]
pub struct ObjectStoreGateway {
    store: Arc<dyn BucketStore>,
}

impl ObjectStoreGateway {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self { store }
    }

    pub async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus> {
        let status = self.store.ensure_bucket(bucket).await.map_err(|err| {
            error!(bucket, error = %err, "bucket check failed");
            err
        })?;
        match status {
            BucketStatus::Created => info!(bucket, "bucket created"),
            BucketStatus::Existing => info!(bucket, "bucket already exists"),
        }
        Ok(status)
    }

    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.store.object_exists(bucket, key).await?)
    }

    pub async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<PutOutcome> {
        if self.exists(bucket, key).await? {
            info!(bucket, key, "object already stored, skipping upload");
            return Ok(PutOutcome::Skipped);
        }

        let size = data.len();
        self.store
            .put_object(bucket, key, data, content_type_for(key))
            .await
            .map_err(|err| {
                error!(bucket, key, error = %err, "upload failed");
                err
            })?;
        info!(bucket, key, bytes = size, "object uploaded");
        Ok(PutOutcome::Uploaded { bytes: size })
    }

    pub async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<PutOutcome> {
        if self.exists(bucket, key).await? {
            info!(bucket, key, "object already stored, skipping upload");
            return Ok(PutOutcome::Skipped);
        }
        let data = tokio::fs::read(path).await?;
        self.put(bucket, key, Bytes::from(data)).await
    }

    /// Keys ending with `suffix` (ASCII case-insensitive), sorted.
    pub async fn list_keys(&self, bucket: &str, suffix: &str) -> Result<Vec<String>> {
        let suffix = suffix.to_ascii_lowercase();
        let mut keys: Vec<String> = self
            .store
            .list_keys(bucket, "")
            .await?
            .into_iter()
            .filter(|key| key.to_ascii_lowercase().ends_with(&suffix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        Ok(self.store.get_object(bucket, key).await?)
    }
}

fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with(".parquet") {
        PARQUET_CONTENT_TYPE
    } else if lower.ends_with(".csv") {
        CSV_CONTENT_TYPE
    } else {
        DEFAULT_CONTENT_TYPE
    }
}
