//! HTML to Markdown conversion of post bodies.
//!
//! [`MarkdownConverter`] walks the parsed body and renders the usual block
//! and inline elements. Every `<a>` is first offered to a [`RuleChain`];
//! only when all rules defer does the default `[text](href)` rendering apply.
//!
//! # Submodules
//!
//! - [`rules`]: The rewrite rule engine and the Substack-specific rules

pub mod rules;

use crate::models::{OutputFormat, PostDocument};
use ego_tree::NodeRef;
use itertools::Itertools;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use thiserror::Error;

pub use rules::{RewriteOutcome, RuleChain};

/// Default bound on element nesting.
pub const DEFAULT_MAX_DEPTH: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("markup nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Converts body HTML to Markdown, consulting a rule chain for anchors.
pub struct MarkdownConverter {
    rules: RuleChain,
    max_depth: usize,
}

impl MarkdownConverter {
    pub fn new(rules: RuleChain) -> Self {
        Self {
            rules,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn convert(&self, html: &str) -> Result<String, ConversionError> {
        let fragment = Html::parse_fragment(html);
        let markdown = self.render_children(*fragment.root_element(), 0)?;
        Ok(normalize(&markdown))
    }

    fn render_children(&self, node: NodeRef<'_, Node>, depth: usize) -> Result<String, ConversionError> {
        let mut out = String::new();
        for child in node.children() {
            let piece = self.render_node(child, depth + 1)?;
            // one space where two inline siblings meet
            match piece.strip_prefix(' ') {
                Some(rest) if out.ends_with(' ') => out.push_str(rest),
                _ => out.push_str(&piece),
            }
        }
        Ok(out)
    }

    fn render_node(&self, node: NodeRef<'_, Node>, depth: usize) -> Result<String, ConversionError> {
        if depth > self.max_depth {
            return Err(ConversionError::TooDeep {
                limit: self.max_depth,
            });
        }
        match node.value() {
            Node::Text(text) => Ok(escape_text(&collapse_whitespace(text))),
            Node::Element(_) => match ElementRef::wrap(node) {
                Some(element) => self.render_element(element, depth),
                None => Ok(String::new()),
            },
            Node::Comment(_) | Node::Doctype(_) | Node::ProcessingInstruction(_) => Ok(String::new()),
            _ => self.render_children(node, depth),
        }
    }

    fn render_element(&self, element: ElementRef<'_>, depth: usize) -> Result<String, ConversionError> {
        let tag = element.value().name();
        let out = match tag {
            "script" | "style" | "noscript" | "template" | "head" | "title" | "meta" | "link" => {
                String::new()
            }
            "a" => self.render_anchor(element, depth)?,
            "img" => render_image(&element),
            "br" => "\\\n".to_string(),
            "hr" => block("---"),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = usize::from(tag.as_bytes()[1] - b'0');
                let inner = self.render_children(*element, depth)?;
                let text = inner.replace("\\\n", " ").split_whitespace().join(" ");
                if text.is_empty() {
                    String::new()
                } else {
                    block(&format!("{} {text}", "#".repeat(level)))
                }
            }
            "strong" | "b" => wrap_inline(&self.render_children(*element, depth)?, "**"),
            "em" | "i" => wrap_inline(&self.render_children(*element, depth)?, "*"),
            "s" | "del" | "strike" => wrap_inline(&self.render_children(*element, depth)?, "~~"),
            "code" => render_code_span(&element.text().collect::<String>()),
            "pre" => render_pre(&element),
            "blockquote" => {
                let inner = normalize(&self.render_children(*element, depth)?);
                let quoted = inner
                    .lines()
                    .map(|line| if line.is_empty() { ">".to_string() } else { format!("> {line}") })
                    .join("\n");
                block(&quoted)
            }
            "ul" => self.render_list(element, false, depth)?,
            "ol" => self.render_list(element, true, depth)?,
            "td" | "th" => format!("{} ", self.render_children(*element, depth)?.trim()),
            "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "aside" | "nav"
            | "figure" | "figcaption" | "table" | "thead" | "tbody" | "tfoot" | "tr" | "dl" | "dt"
            | "dd" | "address" | "details" | "summary" => block(&self.render_children(*element, depth)?),
            _ => self.render_children(*element, depth)?,
        };
        Ok(out)
    }

    fn render_anchor(&self, element: ElementRef<'_>, depth: usize) -> Result<String, ConversionError> {
        if let RewriteOutcome::Matched(markdown) = self.rules.apply(&element) {
            return Ok(markdown);
        }

        let content = self.render_children(*element, depth)?;
        let href = element.value().attr("href").map(str::trim).unwrap_or_default();
        if href.is_empty() {
            return Ok(content);
        }
        let text = content.trim();
        if text.is_empty() {
            return Ok(String::new());
        }
        Ok(match element.value().attr("title").map(str::trim) {
            Some(title) if !title.is_empty() => format!("[{text}]({href} \"{title}\")"),
            _ => format!("[{text}]({href})"),
        })
    }

    fn render_list(&self, list: ElementRef<'_>, ordered: bool, depth: usize) -> Result<String, ConversionError> {
        let start = list
            .value()
            .attr("start")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);

        let mut items = Vec::new();
        for child in list.children() {
            let Some(item) = ElementRef::wrap(child) else {
                continue;
            };
            if item.value().name() != "li" {
                continue;
            }
            let body = self.render_children(*item, depth + 1)?;
            let marker = if ordered {
                format!("{}. ", start + items.len())
            } else {
                "- ".to_string()
            };
            items.push(indent_item(&marker, &body));
        }
        Ok(block(&items.join("\n")))
    }
}

/// Replace `post.body` with its Markdown rendering when `format` asks for it.
///
/// The body HTML is replaced in place.
pub fn transform_post(
    post: &mut PostDocument,
    format: OutputFormat,
    converter: &MarkdownConverter,
) -> Result<(), ConversionError> {
    if format.needs_conversion() {
        post.body = converter.convert(&post.body)?;
    }
    Ok(())
}

fn render_image(element: &ElementRef<'_>) -> String {
    let src = element.value().attr("src").map(str::trim).unwrap_or_default();
    if src.is_empty() {
        return String::new();
    }
    let alt = element.value().attr("alt").unwrap_or_default().trim();
    match element.value().attr("title").map(str::trim) {
        Some(title) if !title.is_empty() => format!("![{alt}]({src} \"{title}\")"),
        _ => format!("![{alt}]({src})"),
    }
}

fn render_pre(element: &ElementRef<'_>) -> String {
    let code: String = element.text().collect();
    let code = code.trim_end_matches('\n');
    let fence = "`".repeat(longest_backtick_run(code).max(2) + 1);
    format!("\n\n{fence}\n{code}\n{fence}\n\n")
}

fn render_code_span(code: &str) -> String {
    if code.is_empty() {
        return String::new();
    }
    let ticks = "`".repeat(longest_backtick_run(code) + 1);
    if code.starts_with('`') || code.ends_with('`') {
        format!("{ticks} {code} {ticks}")
    } else {
        format!("{ticks}{code}{ticks}")
    }
}

fn longest_backtick_run(s: &str) -> usize {
    s.split(|c| c != '`').map(str::len).max().unwrap_or(0)
}

/// Escape text so it reads literally, never as Markdown syntax.
fn escape_text(text: &str) -> String {
    escape_block_marker(escape_inline(text))
}

/// Backslash-escape the characters that open inline constructs.
fn escape_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '*' | '_' | '[' | ']' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escape a leading heading, quote, bullet or `N.` marker.
///
/// Text nodes do not know whether they start a line, so every node is
/// treated as if it did; an escaped marker mid-line still renders as itself.
fn escape_block_marker(mut text: String) -> String {
    let start = text.len() - text.trim_start().len();
    let rest = &text[start..];
    let ends_marker = |at: usize| rest[at..].chars().next().is_none_or(char::is_whitespace);

    let at = if rest.starts_with('#') || rest.starts_with('>') {
        Some(start)
    } else if (rest.starts_with('-') || rest.starts_with('+')) && ends_marker(1) {
        Some(start)
    } else {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        (digits > 0 && rest[digits..].starts_with('.') && ends_marker(digits + 1)).then_some(start + digits)
    };
    if let Some(at) = at {
        text.insert(at, '\\');
    }
    text
}

/// Drop trailing hard breaks, leaving escaped backslashes alone.
fn strip_trailing_breaks(s: &str) -> &str {
    let mut s = s.trim_end();
    while (s.len() - s.trim_end_matches('\\').len()) % 2 == 1 {
        s = s[..s.len() - 1].trim_end();
    }
    s
}

/// Surround `inner` with blank lines, dropping a trailing hard break.
fn block(inner: &str) -> String {
    let trimmed = strip_trailing_breaks(inner.trim());
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n\n{trimmed}\n\n")
    }
}

/// Wrap with an emphasis marker, keeping surrounding whitespace outside it.
fn wrap_inline(inner: &str, mark: &str) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return inner.to_string();
    }
    let lead = if inner.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if inner.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{lead}{mark}{trimmed}{mark}{trail}")
}

/// First line after the marker, the rest indented to line up with it.
///
/// Paragraphs inside the item stay one blank line apart; a nested list
/// follows its parent line directly.
fn indent_item(marker: &str, body: &str) -> String {
    let pad = " ".repeat(marker.len());
    let mut out = marker.to_string();
    let mut first = true;
    let mut pending_blank = false;
    for line in strip_trailing_breaks(body.trim()).lines() {
        if line.trim().is_empty() {
            pending_blank = true;
            continue;
        }
        if first {
            out.push_str(line.trim_start());
            first = false;
            continue;
        }
        if pending_blank && !starts_list_item(line) {
            out.push('\n');
        }
        pending_blank = false;
        out.push('\n');
        out.push_str(&pad);
        out.push_str(line);
    }
    out
}

fn starts_list_item(line: &str) -> bool {
    let line = line.trim_start();
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    line.starts_with("- ") || (digits > 0 && line[digits..].starts_with(". "))
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Tidy rendered Markdown: squeeze blank lines and trim line ends, leaving
/// fenced code untouched.
///
/// A fence closes only on a bare backtick line at least as long as the one
/// that opened it, so shorter fences inside code stay code.
fn normalize(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut open_fence: Option<usize> = None;
    let mut blank_run = 0;

    for line in markdown.lines() {
        match (open_fence, fence_len(line)) {
            (None, Some(len)) => open_fence = Some(len),
            (Some(open), Some(len)) if len >= open => open_fence = None,
            (Some(_), _) => {
                out.push_str(line);
                out.push('\n');
                continue;
            }
            (None, None) => {}
        }

        let line = tidy_line(line);
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Length of `line` if it is nothing but a fence of three or more backticks.
fn fence_len(line: &str) -> Option<usize> {
    let line = line.trim();
    (line.len() >= 3 && line.bytes().all(|b| b == b'`')).then_some(line.len())
}

/// Trim a rendered line. Indentation of two or more spaces is kept
/// (nested list items); a single leading space is leftover text whitespace.
fn tidy_line(line: &str) -> String {
    let content = line.trim();
    let indent = line.len() - line.trim_start().len();
    if content.is_empty() || indent < 2 {
        content.to_string()
    } else {
        format!("{}{content}", " ".repeat(indent))
    }
}
