//! Long-retention object archive client
//!
//! The archive is a public S3 bucket per satellite holding raw instrument
//! payloads. Object names carry fields that cannot be predicted (scan mode,
//! seconds, end and creation times), so a slot is resolved by listing its
//! hour prefix and matching the locator's wildcard pattern. The payload is
//! then rendered into a raster by a [`Renderer`].

use super::atomic::{copy_file_atomic, write_stream_atomic};
use super::render::{RenderError, Renderer};
use super::{RemoteStore, StoreKind};
use crate::error::FetchError;
use crate::models::SlotKey;
use crate::services::time_index::{archive_locator, ArchiveLocator};
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempPath;

const USER_AGENT: &str = concat!("satfill/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 15;
/// Guard against a listing that never stops returning continuation tokens
const MAX_LIST_PAGES: usize = 100;

/// One page of a ListObjectsV2 response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<Key>([^<]+)</Key>").expect("static key pattern"))
}

fn truncated_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").expect("static truncation pattern")
    })
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<NextContinuationToken>([^<]+)</NextContinuationToken>")
            .expect("static token pattern")
    })
}

/// Extract object keys and the continuation token from a ListObjectsV2 body
///
/// Only the handful of elements the listing needs are read; the response
/// schema is flat enough that a full XML parser buys nothing.
pub fn parse_list_page(body: &str) -> ListPage {
    let keys = key_pattern()
        .captures_iter(body)
        .map(|c| unescape_xml(&c[1]))
        .collect();

    let next_token = if truncated_pattern().is_match(body) {
        token_pattern()
            .captures(body)
            .map(|c| unescape_xml(&c[1]))
    } else {
        None
    };

    ListPage { keys, next_token }
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"&(#x[0-9A-Fa-f]+|#[0-9]+|lt|gt|amp|quot|apos);")
            .expect("static reference pattern")
    })
}

/// Decode entity and character references in one pass
///
/// Single pass so `&amp;lt;` yields `&lt;`, not `<`. References naming no
/// valid character are kept verbatim.
fn unescape_xml(text: &str) -> String {
    reference_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let decoded = match &caps[1] {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                numeric => {
                    let code = match numeric.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => numeric.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok()),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Client for the archive buckets
pub struct ArchiveStore {
    http_client: reqwest::Client,
    /// `{bucket}` is substituted per satellite
    url_template: String,
    renderer: Arc<dyn Renderer>,
    scratch_dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(
        url_template: impl Into<String>,
        renderer: Arc<dyn Renderer>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            url_template: url_template.into(),
            renderer,
            scratch_dir: scratch_dir.into(),
        })
    }

    fn bucket_url(&self, bucket: &str) -> String {
        self.url_template
            .replace("{bucket}", bucket)
            .trim_end_matches('/')
            .to_string()
    }

    /// Every object key under the locator's literal prefix, all pages
    pub async fn list(&self, locator: &ArchiveLocator) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/", self.bucket_url(&locator.bucket));
        let prefix = locator.list_prefix();
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        for page_number in 0..MAX_LIST_PAGES {
            let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(t) = token.as_deref() {
                query.push(("continuation-token", t));
            }

            let response = self
                .http_client
                .get(&url)
                .query(&query)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(e, &url))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::from_status(status, &format!("list {}", prefix)));
            }

            let body = response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(e, &url))?;
            let page = parse_list_page(&body);

            tracing::trace!(
                bucket = %locator.bucket,
                prefix,
                page = page_number,
                objects = page.keys.len(),
                "Listed archive page"
            );

            keys.extend(page.keys);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(keys),
            }
        }

        tracing::warn!(prefix, pages = MAX_LIST_PAGES, "Archive listing truncated");
        Ok(keys)
    }

    /// Object key holding the slot's payload, if any
    pub async fn resolve(&self, key: &SlotKey) -> Result<Option<String>, FetchError> {
        let locator =
            archive_locator(key).map_err(|e| FetchError::Misconfigured(e.to_string()))?;
        let listed = self.list(&locator).await?;
        let selected = locator.select(listed.iter().map(String::as_str));
        if let Some(object) = selected {
            let candidates = listed.iter().filter(|k| locator.matches(k)).count();
            if candidates > 1 {
                tracing::debug!(key = %key, candidates, selected = object, "Several archive objects match slot");
            }
        }
        Ok(selected.map(str::to_string))
    }

    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> Result<u64, FetchError> {
        let url = format!("{}/{}", self.bucket_url(bucket), object);
        tracing::debug!(url = %url, "Downloading archive payload");

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
        write_stream_atomic(dest, body).await
    }
}

#[async_trait]
impl RemoteStore for ArchiveStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Archive
    }

    async fn exists(&self, key: &SlotKey) -> Result<bool, FetchError> {
        Ok(self.resolve(key).await?.is_some())
    }

    async fn fetch(&self, key: &SlotKey, dest: &Path) -> Result<PathBuf, FetchError> {
        if !self.renderer.is_configured() {
            return Err(render_failure(key, RenderError::NotConfigured));
        }

        let object = self
            .resolve(key)
            .await?
            .ok_or_else(|| FetchError::NotFound(format!("no archive object for {}", key)))?;
        let bucket = key.satellite().bucket();

        // Everything produced on the way to `dest` lives in this directory and
        // goes with it, whatever path out of here is taken
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| FetchError::from_io(e, &format!("create {}", self.scratch_dir.display())))?;
        let scratch = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| FetchError::from_io(e, &format!("scratch for {}", key)))?;

        let object_name = object.rsplit('/').next().unwrap_or(object.as_str());
        let raw = scratch.path().join(object_name);

        let bytes = self.download(bucket, &object, &raw).await?;
        tracing::debug!(key = %key, object = %object, bytes, "Archive payload downloaded");

        let rendered = self
            .renderer
            .render(&raw)
            .await
            .map_err(|e| render_failure(key, e))?;
        // A renderer may write outside the scratch directory
        let _rendered_outside = (!rendered.starts_with(scratch.path()))
            .then(|| TempPath::from_path(rendered.clone()));

        copy_file_atomic(&rendered, dest).await?;
        tracing::debug!(key = %key, path = %dest.display(), "Archive frame stored");

        Ok(dest.to_path_buf())
    }
}

fn render_failure(key: &SlotKey, err: RenderError) -> FetchError {
    let message = format!("render {}: {}", key, err);
    if err.is_misconfiguration() {
        FetchError::Misconfigured(message)
    } else {
        FetchError::NetworkError(message)
    }
}
