//! Anchor rewrite rules applied during HTML to Markdown conversion.
//!
//! Substack bodies carry two kinds of links that do not survive a plain
//! conversion:
//! - images wrapped in an `a.image-link` pointing at the image CDN, with the
//!   real asset URL percent-encoded inside the CDN URL;
//! - absolute links to other posts of the same publication.
//!
//! Rules are tried in order and the first [`RewriteOutcome::Matched`] wins.
//! A rule defers either by rejecting the node in
//! [`RewriteRule::applies_to`] or by returning [`RewriteOutcome::Deferred`]
//! from [`RewriteRule::rewrite`]; both hand the anchor to the next rule, and
//! finally to the converter's default anchor rendering.

use scraper::ElementRef;

/// Class Substack puts on anchors that wrap a preview image.
pub const IMAGE_LINK_CLASS: &str = "image-link";

/// Percent-encoded `https://`, marking where the embedded asset URL starts.
const ENCODED_HTTPS_PREFIX: &str = "https%3A%2F%2F";

/// Storage bucket old image URLs still point at.
pub const LEGACY_MEDIA_BUCKET: &str = "bucketeer-e05bbc84-baa3-437e-9518-adb32be77984";

/// Current name of that bucket.
pub const MEDIA_BUCKET: &str = "substack-post-media";

/// Result of offering an anchor to a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Markdown that replaces the whole anchor.
    Matched(String),
    /// No opinion; try the next rule.
    Deferred,
}

/// A predicate plus transform over anchor elements.
pub trait RewriteRule: Send + Sync {
    /// Cheap structural check; `false` skips [`RewriteRule::rewrite`].
    fn applies_to(&self, anchor: &ElementRef<'_>) -> bool;

    /// Produce the replacement, or defer after a closer look.
    fn rewrite(&self, anchor: &ElementRef<'_>) -> RewriteOutcome;
}

/// Ordered list of rules, evaluated first to last.
#[derive(Default)]
pub struct RuleChain {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The Substack rules, image links before internal links.
    ///
    /// An image wrapper could otherwise be taken for a link to a post.
    pub fn substack(post_prefix: impl Into<String>) -> Self {
        Self::new()
            .with(ImageLinkRule::default())
            .with(InternalLinkRule::new(post_prefix))
    }

    /// Append a rule with the lowest priority so far.
    pub fn with(mut self, rule: impl RewriteRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Offer `anchor` to each rule in turn.
    pub fn apply(&self, anchor: &ElementRef<'_>) -> RewriteOutcome {
        for rule in &self.rules {
            if !rule.applies_to(anchor) {
                continue;
            }
            if let RewriteOutcome::Matched(markdown) = rule.rewrite(anchor) {
                return RewriteOutcome::Matched(markdown);
            }
        }
        RewriteOutcome::Deferred
    }
}

/// `href` of `anchor`, unless it is missing, blank, or a bare `#`.
fn usable_href<'a>(anchor: &ElementRef<'a>) -> Option<&'a str> {
    let href = anchor.value().attr("href")?;
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed == "#" {
        None
    } else {
        Some(href)
    }
}

/// Turns `a.image-link` CDN wrappers into plain image embeds.
///
/// `https://substackcdn.com/image/fetch/f_auto,q_auto:good/https%3A%2F%2Fsubstack-post-media.s3.amazonaws.com%2Fpublic%2Fimages%2Fx.png`
/// becomes `![](https://substack-post-media.s3.amazonaws.com/public/images/x.png)`.
#[derive(Debug, Clone)]
pub struct ImageLinkRule {
    legacy_bucket: String,
    bucket: String,
}

impl ImageLinkRule {
    pub fn new(legacy_bucket: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            legacy_bucket: legacy_bucket.into(),
            bucket: bucket.into(),
        }
    }
}

impl Default for ImageLinkRule {
    fn default() -> Self {
        Self::new(LEGACY_MEDIA_BUCKET, MEDIA_BUCKET)
    }
}

impl RewriteRule for ImageLinkRule {
    fn applies_to(&self, anchor: &ElementRef<'_>) -> bool {
        anchor.value().classes().any(|c| c == IMAGE_LINK_CLASS)
    }

    fn rewrite(&self, anchor: &ElementRef<'_>) -> RewriteOutcome {
        let Some(href) = usable_href(anchor) else {
            return RewriteOutcome::Deferred;
        };
        let Some(idx) = href.find(ENCODED_HTTPS_PREFIX) else {
            return RewriteOutcome::Deferred;
        };
        let Ok(decoded) = urlencoding::decode(&href[idx..]) else {
            return RewriteOutcome::Deferred;
        };
        let src = decoded.replace(&self.legacy_bucket, &self.bucket);
        RewriteOutcome::Matched(format!("![]({src})"))
    }
}

/// Rewrites absolute links to the publication's own posts as relative ones.
///
/// With prefix `https://acme.substack.com/p/`, `<a href="https://acme.substack.com/p/my-post">Read more</a>`
/// becomes `[Read more](my-post)`.
#[derive(Debug, Clone)]
pub struct InternalLinkRule {
    post_prefix: String,
}

impl InternalLinkRule {
    pub fn new(post_prefix: impl Into<String>) -> Self {
        Self {
            post_prefix: post_prefix.into(),
        }
    }
}

impl RewriteRule for InternalLinkRule {
    fn applies_to(&self, anchor: &ElementRef<'_>) -> bool {
        anchor.value().name().eq_ignore_ascii_case("a")
    }

    fn rewrite(&self, anchor: &ElementRef<'_>) -> RewriteOutcome {
        let Some(href) = usable_href(anchor) else {
            return RewriteOutcome::Deferred;
        };
        match href.strip_prefix(self.post_prefix.as_str()) {
            Some(rest) => {
                let text = super::escape_inline(&anchor.text().collect::<String>());
                RewriteOutcome::Matched(format!("[{text}]({rest})"))
            }
            None => RewriteOutcome::Deferred,
        }
    }
}
