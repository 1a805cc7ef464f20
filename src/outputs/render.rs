//! Per-post artifact rendering.
//!
//! # Formats
//!
//! - **html**: `<h1>{title}</h1><h2>{subtitle}</h2>{body}`
//! - **md**: YAML front matter, then the title heading, subtitle, a
//!   separator and the converted body:
//!
//! ```text
//! ---
//! title: "Post title"
//! date: 2024-01-02
//! alias: []
//! tags: [section-slug]
//! ---
//!
//! # Post title
//!
//! Subtitle
//!
//! ---
//!
//! Body
//! ```

use crate::models::{OutputArtifact, OutputFormat, PostDocument};
use std::fmt::Write;
use std::path::Path;

/// Render `post` for `format`, tagged with its section slug, at `{dest}/{slug}.{ext}`.
pub fn render_artifact(post: &PostDocument, format: OutputFormat, tag: &str, dest: &Path) -> OutputArtifact {
    let contents = match format {
        OutputFormat::Html => render_html(post),
        OutputFormat::Md => render_markdown(post, tag),
    };
    let filename = format!("{}.{}", file_stem(&post.slug), format.extension());
    OutputArtifact {
        path: dest.join(filename),
        contents,
    }
}

fn render_html(post: &PostDocument) -> String {
    format!(
        "<h1>{}</h1><h2>{}</h2>{}",
        html_escape::encode_text(&post.title),
        html_escape::encode_text(&post.subtitle),
        post.body
    )
}

fn render_markdown(post: &PostDocument, tag: &str) -> String {
    let mut md = String::new();
    writeln!(md, "---").unwrap();
    writeln!(md, "title: \"{}\"", yaml_escape(&post.title)).unwrap();
    writeln!(md, "date: {}", post.publish_date.format("%Y-%m-%d")).unwrap();
    writeln!(md, "alias: []").unwrap();
    writeln!(md, "tags: [{tag}]").unwrap();
    writeln!(md, "---").unwrap();
    write!(
        md,
        "\n# {}\n\n{}\n\n---\n\n{}",
        post.title, post.subtitle, post.body
    )
    .unwrap();
    md
}

/// Escape for a YAML double-quoted scalar.
fn yaml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Slug made safe as a single file name component.
fn file_stem(slug: &str) -> String {
    let cleaned: String = slug
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}
