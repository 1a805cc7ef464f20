//! Data models for the archive listing, full posts, and rendered output.
//!
//! This module defines the core data structures used throughout the application:
//! - [`ArchiveEntry`]: One row of the paginated `/api/v1/archive` listing
//! - [`PostDocument`]: A full post as returned by `/api/v1/posts/{slug}`
//! - [`OutputFormat`]: The representation each post is written in
//! - [`OutputArtifact`]: A rendered file, ready to be persisted
//!
//! The remote API sends `null` for several string fields (posts without a
//! subtitle, entries outside any section). Those decode as empty strings.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;

/// Who is allowed to read a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Free to read for everyone.
    Everyone,
    /// Restricted to paying subscribers.
    OnlyPaid,
    /// Any audience value this client does not know about (e.g. `founding`).
    #[serde(other)]
    Other,
}

/// A single entry of the archive listing.
///
/// Pages of the listing are ordered most recent first, which is what lets the
/// archive walker stop paging early (see [`crate::archive`]).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveEntry {
    /// URL slug of the post, used to fetch it and to name the output file.
    pub slug: String,
    /// Publication timestamp.
    #[serde(rename = "post_date")]
    pub publish_date: DateTime<Utc>,
    /// Audience the post was published for.
    pub audience: Audience,
    /// Slug of the section the post belongs to. Used as the Markdown tag.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub section_slug: String,
    /// Human-readable section name.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub section_name: String,
}

/// A full post record.
///
/// There are more fields than this in the API response; these are the ones
/// the archiver reads. `body_html` is replaced in place by the converted
/// Markdown when the output format asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostDocument {
    pub id: i64,
    pub publication_id: i32,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub post_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subtitle: String,
    pub slug: String,
    #[serde(rename = "post_date")]
    pub publish_date: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub canonical_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(rename = "body_html", default, deserialize_with = "null_as_empty")]
    pub body: String,
}

/// Output representation of each archived post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Title, subtitle and the raw body HTML.
    #[default]
    Html,
    /// YAML front matter followed by the body converted to Markdown.
    Md,
}

impl OutputFormat {
    /// File extension used for artifacts in this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Md => "md",
        }
    }

    /// Whether bodies must go through the HTML to Markdown conversion.
    pub fn needs_conversion(self) -> bool {
        matches!(self, OutputFormat::Md)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A rendered post, produced and written in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub contents: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
