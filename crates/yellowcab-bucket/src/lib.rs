//! Abstractions over S3-compatible storage backends used for raw trip extracts.

mod memory;

pub use memory::MemoryBucketStore;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }

    /// SDK failures (dispatch, timeouts, throttling) are worth a scheduler retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BucketError::Sdk(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Created,
    Existing,
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus, BucketError>;
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, BucketError>;
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BucketError>;
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BucketError>;
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
}

impl S3BucketStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.region.is_empty() {
            return Err(BucketError::Configuration("region cannot be empty".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client })
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<BucketStatus, BucketError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(BucketStatus::Existing),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                self.client
                    .create_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(BucketError::from_sdk)?;
                Ok(BucketStatus::Created)
            }
            Err(other) => Err(BucketError::from_sdk(other)),
        }
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, BucketError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                Ok(false)
            }
            Err(other) => Err(BucketError::from_sdk(other)),
        }
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BucketError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(BucketError::from_sdk)?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        Ok(keys)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    if service_err.err().is_no_such_key() {
                        BucketError::NotFound(format!("{bucket}/{key}"))
                    } else {
                        BucketError::from_sdk(service_err.err())
                    }
                }
                other => BucketError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(data.into_bytes())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BucketError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }
}
