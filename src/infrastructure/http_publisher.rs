// HTTP push publisher - POSTs deltas and metadata as JSON
use crate::application::publisher::StatusPublisher;
use crate::domain::metadata::MetaDelta;
use crate::domain::snapshot::Delta;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpPublisher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn device_url(&self, device_id: &str, kind: &str) -> String {
        format!(
            "{}/devices/{}/{}",
            self.base_url,
            urlencoding::encode(device_id),
            kind
        )
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Publish to {} failed with status {}: {}", url, status, body);
        }

        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for HttpPublisher {
    async fn publish_values(&self, delta: &Delta) -> Result<()> {
        let url = self.device_url(&delta.device_id, "values");
        tracing::debug!("Publishing {} values to {}", delta.values.len(), url);
        self.post(&url, &delta.values).await
    }

    async fn publish_meta(&self, meta: &MetaDelta) -> Result<()> {
        let url = self.device_url(&meta.device_id, "meta");
        self.post(&url, &meta.meta).await
    }
}
