//! Immutable run configuration.
//!
//! A [`SyncConfig`] is built once from the command line and handed by
//! reference to every component of the pipeline. Nothing mutates it after
//! construction.

use crate::models::OutputFormat;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Number of entries requested per archive page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Minimum spacing between two outbound requests.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Everything a sync run needs to know.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Publication name, e.g. `acme` for `acme.substack.com`.
    pub publication: String,
    /// Value of the `substack.sid` session cookie. Empty for anonymous access.
    pub cookie: String,
    pub format: OutputFormat,
    pub dest_folder: PathBuf,
    /// Only posts published strictly after this instant are archived.
    pub cutoff: DateTime<Utc>,
    /// Root of the publication site, always ending in `/`.
    pub site_url: Url,
    pub page_size: usize,
    pub request_delay: Duration,
}

impl SyncConfig {
    /// Default site root for a publication hosted on substack.com.
    pub fn default_site_url(publication: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("https://{publication}.substack.com/"))
    }

    /// Base of the JSON API, `{site}/api/v1/`.
    pub fn api_base(&self) -> Url {
        let mut url = self.site_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "v1", ""]);
        }
        url
    }

    /// Prefix shared by every canonical post URL of the publication, `{site}/p/`.
    pub fn post_prefix(&self) -> String {
        format!("{}p/", self.site_url)
    }
}

#[cfg(test)]
pub(crate) fn test_config(site_url: &str) -> SyncConfig {
    SyncConfig {
        publication: "acme".to_string(),
        cookie: String::new(),
        format: OutputFormat::Md,
        dest_folder: PathBuf::from("."),
        cutoff: DateTime::<Utc>::UNIX_EPOCH,
        site_url: Url::parse(site_url).unwrap(),
        page_size: DEFAULT_PAGE_SIZE,
        request_delay: Duration::ZERO,
    }
}
