//! Pipeline driver.
//!
//! Sequences a whole sync run:
//! 1. **Listing**: Walk the archive for entries after the cutoff (fatal on failure)
//! 2. **Fetching**: Download each post by slug
//! 3. **Transforming**: Convert the body to Markdown when the format asks for it
//! 4. **Writing**: Render and write the artifact
//!
//! Entries are processed one at a time. A failure at any per-entry stage is
//! logged with the slug and the entry is skipped; the run carries on and
//! still succeeds. The only state shared between entries is the rate limiter.

use crate::api::{ApiError, SubstackApi};
use crate::archive::walk_archive;
use crate::config::SyncConfig;
use crate::convert::{ConversionError, MarkdownConverter, RuleChain, transform_post};
use crate::models::{ArchiveEntry, Audience};
use crate::outputs::{WriteError, prepare_destination, render_artifact, write_artifact};
use crate::throttle::RateLimiter;
use crate::utils::truncate_for_log;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Per-entry stage an entry can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStage {
    Fetching,
    Transforming,
    Writing,
}

impl fmt::Display for EntryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStage::Fetching => "fetching",
            EntryStage::Transforming => "transforming",
            EntryStage::Writing => "writing",
        })
    }
}

/// Why an entry was skipped.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("error fetching post: {0}")]
    Fetch(#[from] ApiError),
    #[error("error converting post: {0}")]
    Convert(#[from] ConversionError),
    #[error("error writing post: {0}")]
    Write(#[from] WriteError),
}

impl EntryError {
    pub fn stage(&self) -> EntryStage {
        match self {
            EntryError::Fetch(_) => EntryStage::Fetching,
            EntryError::Convert(_) => EntryStage::Transforming,
            EntryError::Write(_) => EntryStage::Writing,
        }
    }
}

/// Failures that abort the whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch the archive listing: {0}")]
    Archive(#[from] ApiError),
    #[error(transparent)]
    Destination(#[from] WriteError),
}

/// Final state of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Done(PathBuf),
    Skipped { stage: EntryStage, reason: String },
}

/// An entry that did not make it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub slug: String,
    pub stage: EntryStage,
    pub reason: String,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries after the cutoff found in the listing.
    pub listed: usize,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedEntry>,
}

/// Drives one sync run against `api`, pacing requests with `limiter`.
pub struct Pipeline<'a, A, L> {
    config: &'a SyncConfig,
    api: A,
    limiter: L,
    converter: MarkdownConverter,
}

impl<'a, A, L> Pipeline<'a, A, L>
where
    A: SubstackApi,
    L: RateLimiter,
{
    pub fn new(config: &'a SyncConfig, api: A, limiter: L) -> Self {
        Self {
            config,
            api,
            limiter,
            converter: MarkdownConverter::new(RuleChain::substack(config.post_prefix())),
        }
    }

    /// Archive every post newer than the cutoff.
    #[instrument(level = "info", skip_all, fields(publication = %self.config.publication, format = %self.config.format))]
    pub async fn run(&mut self) -> Result<SyncReport, SyncError> {
        let t0 = Instant::now();
        prepare_destination(&self.config.dest_folder).await?;

        let entries = walk_archive(
            &self.api,
            &mut self.limiter,
            self.config.cutoff,
            self.config.page_size,
        )
        .await?;
        info!(count = entries.len(), "Fetching posts");

        let mut report = SyncReport {
            listed: entries.len(),
            ..SyncReport::default()
        };
        for entry in &entries {
            match self.process_entry(entry).await {
                EntryOutcome::Done(path) => report.written.push(path),
                EntryOutcome::Skipped { stage, reason } => report.skipped.push(SkippedEntry {
                    slug: entry.slug.clone(),
                    stage,
                    reason,
                }),
            }
        }

        info!(
            listed = report.listed,
            written = report.written.len(),
            skipped = report.skipped.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Sync complete"
        );
        Ok(report)
    }

    /// Fetch, transform and write one entry, never failing the run.
    pub async fn process_entry(&mut self, entry: &ArchiveEntry) -> EntryOutcome {
        match self.try_process_entry(entry).await {
            Ok(path) => {
                debug!(slug = %entry.slug, path = %path.display(), "Archived post");
                EntryOutcome::Done(path)
            }
            Err(e) => {
                let stage = e.stage();
                error!(slug = %entry.slug, %stage, error = %e, "Skipping post");
                EntryOutcome::Skipped {
                    stage,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_process_entry(&mut self, entry: &ArchiveEntry) -> Result<PathBuf, EntryError> {
        if entry.audience == Audience::OnlyPaid && self.config.cookie.is_empty() {
            warn!(slug = %entry.slug, "Paid post requested without a session cookie, body may be a preview");
        }
        self.limiter.wait_for_slot().await;
        let mut post = self.api.post(&entry.slug).await?;
        debug!(
            id = post.id,
            publication_id = post.publication_id,
            kind = %post.post_type,
            url = %post.canonical_url,
            description = %truncate_for_log(&post.description, 80),
            section = %entry.section_name,
            "Fetched post"
        );

        transform_post(&mut post, self.config.format, &self.converter)?;

        let artifact = render_artifact(
            &post,
            self.config.format,
            &entry.section_slug,
            &self.config.dest_folder,
        );
        Ok(write_artifact(&artifact).await?)
    }

    #[cfg(test)]
    fn limiter(&self) -> &L {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::HttpApi;
    use crate::archive::tests::{day, entry};
    use crate::config::test_config;
    use crate::models::{OutputFormat, PostDocument};
    use crate::throttle::Unthrottled;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingLimiter {
        slots: usize,
    }

    impl RateLimiter for CountingLimiter {
        async fn wait_for_slot(&mut self) {
            self.slots += 1;
        }
    }

    #[derive(Default)]
    struct FakeApi {
        listing: Vec<ArchiveEntry>,
        posts: HashMap<String, PostDocument>,
        listing_down: bool,
    }

    impl FakeApi {
        fn with_post(mut self, entry: ArchiveEntry, body: &str) -> Self {
            let post = PostDocument {
                id: self.posts.len() as i64 + 1,
                publication_id: 1,
                post_type: "newsletter".to_string(),
                title: format!("Title of {}", entry.slug),
                subtitle: "Sub".to_string(),
                slug: entry.slug.clone(),
                publish_date: entry.publish_date,
                canonical_url: format!("https://acme.substack.com/p/{}", entry.slug),
                description: String::new(),
                body: body.to_string(),
            };
            self.posts.insert(entry.slug.clone(), post);
            self.listing.push(entry);
            self
        }
    }

    impl SubstackApi for FakeApi {
        async fn archive_page(&self, offset: usize, limit: usize) -> Result<Vec<ArchiveEntry>, ApiError> {
            if self.listing_down {
                return Err(ApiError::Transport {
                    url: "fake/archive".to_string(),
                    reason: "HTTP 503 Service Unavailable".to_string(),
                });
            }
            Ok(self.listing.iter().skip(offset).take(limit).cloned().collect())
        }

        async fn post(&self, slug: &str) -> Result<PostDocument, ApiError> {
            self.posts.get(slug).cloned().ok_or_else(|| ApiError::Transport {
                url: format!("fake/posts/{slug}"),
                reason: "HTTP 404 Not Found".to_string(),
            })
        }
    }

    fn config_in(dest: &Path, format: OutputFormat) -> SyncConfig {
        let mut config = test_config("https://acme.substack.com/");
        config.dest_folder = dest.to_path_buf();
        config.format = format;
        config.cutoff = day(0);
        config
    }

    fn stages(report: &SyncReport) -> Vec<(&str, EntryStage)> {
        report.skipped.iter().map(|s| (s.slug.as_str(), s.stage)).collect()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_post_is_skipped_and_run_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), OutputFormat::Md);
        let mut api = FakeApi::default()
            .with_post(entry("first", day(3)), "<p>one</p>")
            .with_post(entry("third", day(1)), "<p>three</p>");
        api.listing.insert(1, entry("second", day(2)));

        let report = Pipeline::new(&config, api, Unthrottled).run().await.unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.written.len(), 2);
        assert_eq!(stages(&report), vec![("second", EntryStage::Fetching)]);
        assert!(report.skipped[0].reason.contains("HTTP 404"));
        assert_eq!(files_in(tmp.path()), vec!["first.md", "third.md"]);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), OutputFormat::Md);
        let api = FakeApi {
            listing_down: true,
            ..FakeApi::default()
        };

        let err = Pipeline::new(&config, api, Unthrottled).run().await.unwrap_err();
        assert!(matches!(err, SyncError::Archive(ApiError::Transport { .. })));
        assert!(files_in(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_conversion_failure_skips_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), OutputFormat::Md);
        let deep = format!("{}x{}", "<div>".repeat(20), "</div>".repeat(20));
        let api = FakeApi::default().with_post(entry("deep", day(1)), &deep);

        let mut pipeline = Pipeline::new(&config, api, Unthrottled);
        pipeline.converter = MarkdownConverter::new(RuleChain::new()).with_max_depth(8);
        let report = pipeline.run().await.unwrap();

        assert_eq!(stages(&report), vec![("deep", EntryStage::Transforming)]);
        assert!(files_in(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_skips_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), OutputFormat::Html);
        // a directory squatting on the target file name
        std::fs::create_dir(tmp.path().join("taken.html")).unwrap();
        let api = FakeApi::default()
            .with_post(entry("taken", day(2)), "<p>a</p>")
            .with_post(entry("free", day(1)), "<p>b</p>");

        let report = Pipeline::new(&config, api, Unthrottled).run().await.unwrap();

        assert_eq!(stages(&report), vec![("taken", EntryStage::Writing)]);
        assert_eq!(report.written, vec![tmp.path().join("free.html")]);
    }

    #[tokio::test]
    async fn test_html_format_keeps_body_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), OutputFormat::Html);
        let body = r#"<p>See <a href="https://acme.substack.com/p/other">other</a></p>"#;
        let api = FakeApi::default().with_post(entry("post", day(1)), body);

        Pipeline::new(&config, api, Unthrottled).run().await.unwrap();

        let html = std::fs::read_to_string(tmp.path().join("post.html")).unwrap();
        assert_eq!(html, format!("<h1>Title of post</h1><h2>Sub</h2>{body}"));
    }

    #[tokio::test]
    async fn test_one_slot_per_request() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path(), OutputFormat::Md);
        let api = FakeApi::default()
            .with_post(entry("a", day(2)), "a")
            .with_post(entry("b", day(1)), "b");

        let mut pipeline = Pipeline::new(&config, api, CountingLimiter::default());
        pipeline.run().await.unwrap();

        // one archive page plus two posts
        assert_eq!(pipeline.limiter().slots, 3);
    }

    async fn mock_publication() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"slug": "fresh", "post_date": "2024-03-05T10:00:00.000Z", "audience": "everyone",
                 "section_slug": "news", "section_name": "News"},
                {"slug": "stale", "post_date": "2023-12-31T10:00:00.000Z", "audience": "only_paid",
                 "section_slug": "news", "section_name": "News"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 11, "publication_id": 3, "type": "newsletter",
                "title": "Fresh", "subtitle": "Sub", "slug": "fresh",
                "post_date": "2024-03-05T10:00:00.000Z",
                "canonical_url": format!("{}/p/fresh", server.uri()),
                "description": "",
                "body_html": format!(
                    r#"<p>See <a href="{}/p/stale">the older post</a>.</p>"#,
                    server.uri()
                )
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/stale"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        server
    }

    fn http_config(server: &MockServer, dest: &Path) -> SyncConfig {
        let mut config = test_config(&format!("{}/", server.uri()));
        config.dest_folder = dest.to_path_buf();
        config.format = OutputFormat::Md;
        config.cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        config
    }

    #[tokio::test]
    async fn test_end_to_end_markdown_run() {
        let server = mock_publication().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = http_config(&server, tmp.path());

        let report = Pipeline::new(&config, HttpApi::new(&config), Unthrottled)
            .run()
            .await
            .unwrap();

        assert_eq!(report.listed, 1);
        assert_eq!(files_in(tmp.path()), vec!["fresh.md"]);

        let contents = std::fs::read_to_string(tmp.path().join("fresh.md")).unwrap();
        assert_eq!(
            contents,
            "---\ntitle: \"Fresh\"\ndate: 2024-03-05\nalias: []\ntags: [news]\n---\n\n# Fresh\n\nSub\n\n---\n\nSee [the older post](stale)."
        );

        let (front, _) = contents
            .strip_prefix("---\n")
            .and_then(|rest| rest.split_once("\n---\n"))
            .unwrap();
        let front: serde_yaml::Value = serde_yaml::from_str(front).unwrap();
        assert_eq!(front["date"].as_str(), Some("2024-03-05"));
        assert_eq!(front["tags"], serde_yaml::from_str::<serde_yaml::Value>("[news]").unwrap());
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_files() {
        let server = mock_publication().await;
        let tmp = tempfile::tempdir().unwrap();
        let config = http_config(&server, tmp.path());

        Pipeline::new(&config, HttpApi::new(&config), Unthrottled).run().await.unwrap();
        let first = std::fs::read(tmp.path().join("fresh.md")).unwrap();

        Pipeline::new(&config, HttpApi::new(&config), Unthrottled).run().await.unwrap();
        let second = std::fs::read(tmp.path().join("fresh.md")).unwrap();

        assert_eq!(first, second);
        assert_eq!(files_in(tmp.path()), vec!["fresh.md"]);
    }
}
