//! Archive walker.
//!
//! Pages through the reverse-chronological archive listing and collects the
//! entries published strictly after the cutoff.
//!
//! # Stopping rule
//!
//! Pages are requested `page_size` entries at a time. After each page:
//! - a short page (fewer than `page_size` entries) means the listing is exhausted;
//! - otherwise the last entry is the oldest on the page, so once it is not
//!   after the cutoff every later page is older still and paging stops;
//! - otherwise the next page is requested.
//!
//! The page length is always checked before its last element is looked at.

use crate::api::{ApiError, SubstackApi};
use crate::models::ArchiveEntry;
use crate::throttle::RateLimiter;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{debug, info, instrument};

/// What to do after a page has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    /// Request the next page.
    Continue,
    /// The listing has no more entries.
    Exhausted,
    /// The oldest entry on the page is at or before the cutoff.
    ReachedCutoff,
}

/// Decide whether another page is needed after reading `page`.
pub fn next_step(page: &[ArchiveEntry], page_size: usize, cutoff: DateTime<Utc>) -> PageStep {
    if page.len() < page_size {
        return PageStep::Exhausted;
    }
    match page.last() {
        None => PageStep::Exhausted,
        Some(oldest) if oldest.publish_date <= cutoff => PageStep::ReachedCutoff,
        Some(_) => PageStep::Continue,
    }
}

/// Fetch every archive entry published strictly after `cutoff`, in listing order.
///
/// One rate limiter slot is taken before each page request. Entries that
/// reappear on a later page (the listing shifts when a post is published
/// mid-walk) are only returned once.
#[instrument(level = "info", skip(api, limiter))]
pub async fn walk_archive<A, L>(
    api: &A,
    limiter: &mut L,
    cutoff: DateTime<Utc>,
    page_size: usize,
) -> Result<Vec<ArchiveEntry>, ApiError>
where
    A: SubstackApi,
    L: RateLimiter,
{
    let mut offset = 0;
    let mut results = Vec::new();

    loop {
        limiter.wait_for_slot().await;
        let page = api.archive_page(offset, page_size).await?;
        let step = next_step(&page, page_size, cutoff);
        debug!(offset, entries = page.len(), ?step, "Read archive page");

        results.extend(page.into_iter().filter(|e| e.publish_date > cutoff));

        if step != PageStep::Continue {
            break;
        }
        offset += page_size;
    }

    let before = results.len();
    let results: Vec<ArchiveEntry> = results
        .into_iter()
        .unique_by(|e| e.slug.clone())
        .collect();
    if results.len() != before {
        debug!(dropped = before - results.len(), "Dropped repeated archive entries");
    }

    info!(count = results.len(), "Collected archive entries after cutoff");
    Ok(results)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Audience, PostDocument};
    use crate::throttle::Unthrottled;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    pub(crate) fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(n)
    }

    pub(crate) fn entry(slug: &str, date: DateTime<Utc>) -> ArchiveEntry {
        ArchiveEntry {
            slug: slug.to_string(),
            publish_date: date,
            audience: Audience::Everyone,
            section_slug: "news".to_string(),
            section_name: "News".to_string(),
        }
    }

    /// `count` entries, one per day, newest first, the newest dated `day(newest)`.
    fn descending(prefix: &str, newest: i64, count: usize) -> Vec<ArchiveEntry> {
        (0..count)
            .map(|i| entry(&format!("{prefix}-{i}"), day(newest - i as i64)))
            .collect()
    }

    /// Serves a fixed listing and records every requested offset.
    struct FakeArchive {
        listing: Vec<ArchiveEntry>,
        requests: RefCell<Vec<usize>>,
    }

    impl FakeArchive {
        fn new(listing: Vec<ArchiveEntry>) -> Self {
            Self {
                listing,
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl SubstackApi for FakeArchive {
        async fn archive_page(&self, offset: usize, limit: usize) -> Result<Vec<ArchiveEntry>, ApiError> {
            self.requests.borrow_mut().push(offset);
            Ok(self.listing.iter().skip(offset).take(limit).cloned().collect())
        }

        async fn post(&self, _slug: &str) -> Result<PostDocument, ApiError> {
            unreachable!("walker never fetches posts")
        }
    }

    #[test]
    fn test_next_step_short_page_is_exhausted() {
        let page = descending("p", 100, 10);
        assert_eq!(next_step(&page, 50, day(0)), PageStep::Exhausted);
    }

    #[test]
    fn test_next_step_empty_page_is_exhausted() {
        assert_eq!(next_step(&[], 50, day(0)), PageStep::Exhausted);
        assert_eq!(next_step(&[], 0, day(0)), PageStep::Exhausted);
    }

    #[test]
    fn test_next_step_checks_oldest_entry() {
        let page = descending("p", 100, 50);
        // oldest entry is day(51)
        assert_eq!(next_step(&page, 50, day(50)), PageStep::Continue);
        assert_eq!(next_step(&page, 50, day(51)), PageStep::ReachedCutoff);
        assert_eq!(next_step(&page, 50, day(60)), PageStep::ReachedCutoff);
    }

    #[tokio::test]
    async fn test_three_full_pages_and_a_partial_one() {
        let api = FakeArchive::new(descending("p", 1000, 170));
        let result = walk_archive(&api, &mut Unthrottled, day(0), 50).await.unwrap();

        assert_eq!(*api.requests.borrow(), vec![0, 50, 100, 150]);
        assert_eq!(result.len(), 170);
        assert!(result.iter().all(|e| e.publish_date > day(0)));
        assert_eq!(result[0].slug, "p-0");
        assert_eq!(result[169].slug, "p-169");
    }

    #[tokio::test]
    async fn test_stops_after_page_whose_oldest_entry_is_at_cutoff() {
        // first page spans day(100)..=day(51), second page continues older
        let api = FakeArchive::new(descending("p", 100, 150));
        let result = walk_archive(&api, &mut Unthrottled, day(60), 50).await.unwrap();

        assert_eq!(*api.requests.borrow(), vec![0]);
        assert_eq!(result.len(), 40);
        assert!(result.iter().all(|e| e.publish_date > day(60)));
    }

    #[tokio::test]
    async fn test_output_matches_filter_regardless_of_page_boundaries() {
        let listing = descending("p", 200, 137);
        for cutoff in [day(-1000), day(63), day(100), day(150), day(199), day(200), day(1000)] {
            let expected: Vec<String> = listing
                .iter()
                .filter(|e| e.publish_date > cutoff)
                .map(|e| e.slug.clone())
                .collect();
            for page_size in [1, 7, 50, 137, 200] {
                let api = FakeArchive::new(listing.clone());
                let result = walk_archive(&api, &mut Unthrottled, cutoff, page_size)
                    .await
                    .unwrap();
                let slugs: Vec<String> = result.into_iter().map(|e| e.slug).collect();
                assert_eq!(slugs, expected, "cutoff {cutoff}, page size {page_size}");
            }
        }
    }

    #[tokio::test]
    async fn test_exact_multiple_of_page_size_ends_on_empty_page() {
        let api = FakeArchive::new(descending("p", 1000, 100));
        let result = walk_archive(&api, &mut Unthrottled, day(0), 50).await.unwrap();

        assert_eq!(*api.requests.borrow(), vec![0, 50, 100]);
        assert_eq!(result.len(), 100);
    }

    #[tokio::test]
    async fn test_repeated_slugs_are_returned_once() {
        // a post published mid-walk pushes "p-49" onto the second page as well
        let mut listing = descending("p", 1000, 50);
        listing.push(entry("p-49", day(1000 - 49)));
        listing.extend(descending("q", 900, 10));
        let api = FakeArchive::new(listing);

        let result = walk_archive(&api, &mut Unthrottled, day(0), 50).await.unwrap();
        assert_eq!(result.len(), 60);
        assert_eq!(result.iter().filter(|e| e.slug == "p-49").count(), 1);
    }

    #[tokio::test]
    async fn test_listing_error_is_propagated() {
        struct Failing;
        impl SubstackApi for Failing {
            async fn archive_page(&self, _: usize, _: usize) -> Result<Vec<ArchiveEntry>, ApiError> {
                Err(ApiError::Transport {
                    url: "http://x/api/v1/archive".into(),
                    reason: "connection refused".into(),
                })
            }
            async fn post(&self, _: &str) -> Result<PostDocument, ApiError> {
                unreachable!()
            }
        }

        let err = walk_archive(&Failing, &mut Unthrottled, day(0), 50).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
    }
}
