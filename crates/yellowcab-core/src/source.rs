//! Remote origin of the monthly trip extracts.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{PipelineError, Result};
use crate::period::Period;

pub const ZONE_LOOKUP_FILE: &str = "taxi_zone_lookup.csv";

/// Answers whether the extract for a period has been published.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    /// Never fails: any fetch error counts as "absent".
    async fn exists(&self, period: Period) -> bool;
}

#[async_trait]
pub trait ExtractSource: AvailabilityProbe {
    async fn fetch(&self, period: Period) -> Result<Bytes>;
    async fn fetch_zone_lookup(&self) -> Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct HttpExtractSource {
    client: Client,
    base_url: String,
}

impl HttpExtractSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn extract_url(&self, period: Period) -> String {
        format!("{}/trip-data/{}", self.base_url, period.extract_name())
    }

    pub fn zone_lookup_url(&self) -> String {
        format!("{}/misc/{}", self.base_url, ZONE_LOOKUP_FILE)
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl AvailabilityProbe for HttpExtractSource {
    async fn exists(&self, period: Period) -> bool {
        let url = self.extract_url(period);
        // Only the status line matters; the body is dropped unread.
        match self.client.get(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                debug!(%period, status = %response.status(), "extract not published");
                false
            }
            Err(err) => {
                debug!(%period, error = %err, "extract probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl ExtractSource for HttpExtractSource {
    async fn fetch(&self, period: Period) -> Result<Bytes> {
        self.download(&self.extract_url(period)).await
    }

    async fn fetch_zone_lookup(&self) -> Result<Bytes> {
        self.download(&self.zone_lookup_url()).await
    }
}
