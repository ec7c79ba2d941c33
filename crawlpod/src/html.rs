//! HTML parser — §4.9. A pure function with no I/O, built on `scraper`
//! (see DESIGN.md for why this supersedes the vendored `kuchiki` crate,
//! whose retrieved copy is missing most of its own source). Never panics
//! on malformed markup: html5ever's tree builder always produces a DOM,
//! however mangled the input.

use std::collections::HashSet;

use scraper::node::Node;
use scraper::{Html, Selector};
use url::Url;

use crate::urls::{normalize, resolve};

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "section",
    "article", "header", "footer", "table", "ul", "ol", "pre", "hr",
];

/// Visible text with block-level boundary spacing. Empty if the document
/// has no text nodes.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    for node in document.root_element().descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }

    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_was_space = false;
    let mut last_was_newline = false;

    for c in text.chars() {
        if c == '\n' {
            if !last_was_newline {
                result.push('\n');
            }
            last_was_newline = true;
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space && !last_was_newline {
                result.push(' ');
            }
            last_was_space = true;
        } else {
            result.push(c);
            last_was_space = false;
            last_was_newline = false;
        }
    }

    result.trim().to_string()
}

fn base_href(document: &Html) -> Option<String> {
    let selector = Selector::parse("base[href]").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|s| s.to_string())
}

/// Absolute, normalized http(s) links resolved against `final_url`,
/// honoring `<base href>` when present. `rel="nofollow"` is intentionally
/// ignored; every `<a href>` is extracted regardless of `rel`.
pub fn extract_links(html: &str, final_url: &Url) -> HashSet<String> {
    let document = Html::parse_document(html);

    let base = base_href(&document)
        .and_then(|href| final_url.join(&href).ok())
        .unwrap_or_else(|| final_url.clone());

    let mut links = HashSet::new();
    let Ok(selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(resolved) = resolve(&base, href) else {
            continue;
        };
        if let Some(normalized) = normalize(resolved.as_str()) {
            links.insert(normalized);
        }
    }

    links
}
