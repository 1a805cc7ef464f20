//! Substack JSON API client.
//!
//! This module provides the interface the pipeline uses to talk to a
//! publication's `/api/v1` endpoints:
//! - [`SubstackApi`]: Core trait for the two calls the archiver needs
//! - [`HttpApi`]: The `reqwest`-backed implementation
//!
//! # Endpoints
//!
//! | Call | Endpoint | Decodes to |
//! |------|----------|------------|
//! | [`SubstackApi::archive_page`] | `GET {site}/api/v1/archive?offset={o}&limit={l}` | `Vec<ArchiveEntry>` |
//! | [`SubstackApi::post`] | `GET {site}/api/v1/posts/{slug}` | [`PostDocument`] |
//!
//! Every request carries the `substack.sid` session cookie. An empty cookie
//! is still sent; public posts are served regardless.
//!
//! There is no retry here: a failed call is reported to the caller, which
//! decides whether the failure is fatal.

use crate::config::SyncConfig;
use crate::models::{ArchiveEntry, PostDocument};
use crate::utils::truncate_for_log;
use reqwest::header::COOKIE;
use serde::de::DeserializeOwned;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Failure of a single API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent, or the server answered with a non-success status.
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    /// The response body is not the JSON shape we expect.
    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The remote calls the archiver depends on.
pub trait SubstackApi {
    /// Fetch archive entries `[offset, offset + limit)`, most recent first.
    async fn archive_page(&self, offset: usize, limit: usize) -> Result<Vec<ArchiveEntry>, ApiError>;

    /// Fetch one full post by slug.
    async fn post(&self, slug: &str) -> Result<PostDocument, ApiError>;
}

/// [`SubstackApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    api_base: Url,
    cookie_header: String,
}

impl HttpApi {
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &SyncConfig) -> Self {
        Self {
            client,
            api_base: config.api_base(),
            cookie_header: format!("substack.sid={}", config.cookie),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET `url` with the session cookie and decode the JSON body.
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let t0 = Instant::now();
        let transport = |reason: String| ApiError::Transport {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .header(COOKIE, &self.cookie_header)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }

        let body = response.text().await.map_err(|e| transport(e.to_string()))?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched API response"
        );

        serde_json::from_str(&body).map_err(|source| {
            warn!(
                error = %source,
                body_preview = %truncate_for_log(&body, 300),
                "API returned non-conforming JSON"
            );
            ApiError::Decode {
                url: url.to_string(),
                source,
            }
        })
    }
}

impl SubstackApi for HttpApi {
    #[instrument(level = "info", skip(self))]
    async fn archive_page(&self, offset: usize, limit: usize) -> Result<Vec<ArchiveEntry>, ApiError> {
        let mut url = self.endpoint(&["archive"]);
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        self.fetch_json(url).await
    }

    #[instrument(level = "info", skip(self))]
    async fn post(&self, slug: &str) -> Result<PostDocument, ApiError> {
        let url = self.endpoint(&["posts", slug]);
        self.fetch_json(url).await
    }
}
