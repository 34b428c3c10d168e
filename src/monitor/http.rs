//! HTTP-backed implementations of the platform collaborator traits.
//!
//! Talks to the external catalog/metadata service over its REST API. The
//! service owns channel and VOD records; this client only reads them.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{PlatformSource, VodCatalog, VodRecord};
use crate::{Error, Result};

/// REST client for the catalog service.
#[derive(Clone)]
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChannelDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LiveStatusDto {
    live: bool,
}

impl HttpPlatformClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::platform(format!("catalog request {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::platform(format!(
                "catalog request {url} returned {}",
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::platform(format!("catalog response from {url} invalid: {e}")))
    }
}

#[async_trait]
impl VodCatalog for HttpPlatformClient {
    async fn get_vod(&self, vod_id: &str) -> Result<VodRecord> {
        self.get_json(&format!("/api/v1/vods/{vod_id}")).await
    }
}

#[async_trait]
impl PlatformSource for HttpPlatformClient {
    async fn tracked_channels(&self) -> Result<Vec<String>> {
        let channels: Vec<ChannelDto> = self.get_json("/api/v1/channels").await?;
        Ok(channels.into_iter().map(|c| c.id).collect())
    }

    async fn is_live(&self, channel_id: &str) -> Result<bool> {
        let status: LiveStatusDto = self
            .get_json(&format!("/api/v1/channels/{channel_id}/live"))
            .await?;
        Ok(status.live)
    }

    async fn channel_vods(&self, channel_id: &str) -> Result<Vec<VodRecord>> {
        self.get_json(&format!("/api/v1/channels/{channel_id}/vods"))
            .await
    }
}
