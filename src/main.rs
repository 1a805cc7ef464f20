//! # Substack Archiver
//!
//! Incrementally mirrors a Substack publication's archive into a local
//! folder, one HTML or Markdown file per post.
//!
//! ## Usage
//!
//! ```sh
//! substack_archiver --pub acme --output md --dest ./vault --since 2024-01-01
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Listing**: Page through the archive until the cutoff date is reached
//! 2. **Fetching**: Download each listed post, pacing every request
//! 3. **Transforming**: Convert bodies to Markdown, rewriting image and internal links
//! 4. **Output**: Write one file per post, overwriting earlier runs
//!
//! Failures on a single post are logged and skipped; only an unusable
//! destination or a failed archive listing abort the run.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::error::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod archive;
mod cli;
mod config;
mod convert;
mod models;
mod outputs;
mod pipeline;
mod throttle;
mod utils;

use api::HttpApi;
use cli::Cli;
use config::SyncConfig;
use pipeline::{Pipeline, SyncError, SyncReport};
use throttle::{RateLimiter, Throttle, Unthrottled};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => Cli::command()
            .error(ErrorKind::ValueValidation, format!("no usable site URL: {e}"))
            .exit(),
    };

    info!(
        publication = %config.publication,
        site = %config.site_url,
        format = %config.format,
        dest = %config.dest_folder.display(),
        cutoff = %config.cutoff.format("%Y-%m-%d"),
        authenticated = !config.cookie.is_empty(),
        "Starting sync"
    );

    let api = HttpApi::new(&config);
    let result = if config.request_delay.is_zero() {
        warn!("Request pacing disabled");
        sync(&config, api, Unthrottled).await
    } else {
        sync(&config, api, Throttle::new(config.request_delay)).await
    };

    match result {
        Ok(report) => {
            for skipped in &report.skipped {
                warn!(slug = %skipped.slug, stage = %skipped.stage, reason = %skipped.reason, "Post was not archived");
            }
            info!(
                listed = report.listed,
                written = report.written.len(),
                skipped = report.skipped.len(),
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Sync aborted");
            Err(e.into())
        }
    }
}

async fn sync<L: RateLimiter>(config: &SyncConfig, api: HttpApi, limiter: L) -> Result<SyncReport, SyncError> {
    Pipeline::new(config, api, limiter).run().await
}
