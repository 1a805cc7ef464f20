//! Command-line interface definitions for the Substack archiver.
//!
//! Arguments are parsed with `clap`; the session cookie may also come from
//! the environment so it stays out of shell history.

use crate::config::{DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_DELAY, SyncConfig};
use crate::models::OutputFormat;
use chrono::{NaiveDate, NaiveTime};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Command-line arguments for the Substack archiver.
///
/// # Examples
///
/// ```sh
/// # Everything the publication has published, as HTML in the current folder
/// substack_archiver --pub acme
///
/// # Markdown for posts after a given day, including paid posts
/// SUBSTACK_COOKIE=s%3A... substack_archiver --pub acme --output md --dest ./vault --since 2024-01-01
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Publication name, the `acme` in acme.substack.com
    #[arg(long = "pub", value_name = "NAME", value_parser = NonEmptyStringValueParser::new())]
    pub publication: String,

    /// Value of the `substack.sid` session cookie, needed for paid posts
    #[arg(long, env = "SUBSTACK_COOKIE", default_value = "", hide_env_values = true)]
    pub cookie: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Html)]
    pub output: OutputFormat,

    /// Destination folder, created when missing
    #[arg(long, default_value = ".")]
    pub dest: PathBuf,

    /// Only archive posts published after this day (YYYY-MM-DD, UTC midnight)
    #[arg(long, value_name = "DATE", value_parser = parse_since, default_value = "1970-01-01")]
    pub since: NaiveDate,

    /// Site root for publications served from a custom domain
    #[arg(long, value_name = "URL")]
    pub site_url: Option<Url>,

    /// Archive entries requested per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE as u16, value_parser = clap::value_parser!(u16).range(1..=50))]
    pub page_size: u16,

    /// Minimum delay between two requests, in milliseconds (0 disables pacing)
    #[arg(long, default_value_t = DEFAULT_REQUEST_DELAY.as_millis() as u64)]
    pub delay_ms: u64,
}

fn parse_since(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

impl Cli {
    /// Build the run configuration.
    ///
    /// Fails only when no valid site URL can be derived from the publication name.
    pub fn into_config(self) -> Result<SyncConfig, url::ParseError> {
        let mut site_url = match self.site_url {
            Some(url) => url,
            None => SyncConfig::default_site_url(&self.publication)?,
        };
        site_url.set_query(None);
        site_url.set_fragment(None);
        if !site_url.path().ends_with('/') {
            let path = format!("{}/", site_url.path());
            site_url.set_path(&path);
        }

        Ok(SyncConfig {
            publication: self.publication,
            cookie: self.cookie,
            format: self.output,
            dest_folder: self.dest,
            cutoff: self.since.and_time(NaiveTime::MIN).and_utc(),
            site_url,
            page_size: usize::from(self.page_size),
            request_delay: Duration::from_millis(self.delay_ms),
        })
    }
}
