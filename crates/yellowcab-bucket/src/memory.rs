use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{BucketError, BucketStatus, BucketStore};

/// Process-local bucket store used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucketStore {
    buckets: Arc<RwLock<HashMap<String, BTreeMap<String, Bytes>>>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object_count(&self, bucket: &str) -> usize {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus, BucketError> {
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Ok(BucketStatus::Existing);
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(BucketStatus::Created)
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, BucketError> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BucketError> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| BucketError::NotFound(bucket.to_string()))?;
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> Result<(), BucketError> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| BucketError::NotFound(bucket.to_string()))?;
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| BucketError::NotFound(format!("{bucket}/{key}")))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BucketError> {
        let mut buckets = self.buckets.write().await;
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_bucket_reports_creation_once() {
        let store = MemoryBucketStore::new();
        assert_eq!(
            store.ensure_bucket("taxi-data").await.unwrap(),
            BucketStatus::Created
        );
        assert_eq!(
            store.ensure_bucket("taxi-data").await.unwrap(),
            BucketStatus::Existing
        );
    }

    #[tokio::test]
    async fn exact_lookup_ignores_shared_prefixes() {
        let store = MemoryBucketStore::new();
        store.ensure_bucket("taxi-data").await.unwrap();
        store
            .put_object(
                "taxi-data",
                "yellow_tripdata_2024-12.parquet.bak",
                Bytes::from_static(b"old"),
                "application/octet-stream",
            )
            .await
            .unwrap();

        assert!(!store
            .object_exists("taxi-data", "yellow_tripdata_2024-12.parquet")
            .await
            .unwrap());
        let listed = store
            .list_keys("taxi-data", "yellow_tripdata_2024-12.parquet")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn put_into_missing_bucket_fails() {
        let store = MemoryBucketStore::new();
        let err = store
            .put_object("nope", "key", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, BucketError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn get_and_delete_roundtrip() {
        let store = MemoryBucketStore::new();
        store.ensure_bucket("b").await.unwrap();
        store
            .put_object("b", "k", Bytes::from_static(b"payload"), "text/plain")
            .await
            .unwrap();
        assert_eq!(store.get_object("b", "k").await.unwrap(), &b"payload"[..]);

        store.delete_object("b", "k").await.unwrap();
        assert_eq!(store.object_count("b").await, 0);
        assert!(matches!(
            store.get_object("b", "k").await,
            Err(BucketError::NotFound(_))
        ));
    }
}
