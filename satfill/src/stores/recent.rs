//! Short-retention image CDN client
//!
//! Frames from the last few days are published as ready-made JPEGs, one URL
//! per slot. `exists` is a HEAD request, `fetch` streams the body.

use super::atomic::write_stream_atomic;
use super::{RemoteStore, StoreKind};
use crate::error::FetchError;
use crate::models::SlotKey;
use crate::services::time_index::recent_locator;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const USER_AGENT: &str = concat!("satfill/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Client for the recent-imagery CDN
#[derive(Debug, Clone)]
pub struct RecentStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl RecentStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;

        Ok(Self::with_client(http_client, base_url))
    }

    pub fn with_client(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, key: &SlotKey) -> String {
        recent_locator(key, &self.base_url)
    }
}

#[async_trait]
impl RemoteStore for RecentStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Recent
    }

    async fn exists(&self, key: &SlotKey) -> Result<bool, FetchError> {
        let url = self.url_for(key);
        tracing::trace!(key = %key, url = %url, "HEAD recent frame");

        let response = self
            .http_client
            .head(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, &url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        match FetchError::from_status(status, &url) {
            FetchError::NotFound(_) => Ok(false),
            other => Err(other),
        }
    }

    async fn fetch(&self, key: &SlotKey, dest: &Path) -> Result<PathBuf, FetchError> {
        let url = self.url_for(key);
        tracing::debug!(key = %key, url = %url, "Downloading recent frame");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &url));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FetchError::from_reqwest(e, &url)));
        let bytes = write_stream_atomic(dest, body).await?;

        tracing::debug!(key = %key, bytes, path = %dest.display(), "Recent frame stored");
        Ok(dest.to_path_buf())
    }
}
