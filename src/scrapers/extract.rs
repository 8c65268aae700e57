//! Text extraction from a parsed article page.
//!
//! Each function returns the best text it can find, or `None`. Length
//! thresholds are applied by the caller except where a function has to choose
//! between several candidate regions.

use once_cell::sync::Lazy;
use readability::extractor;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static P: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("valid selector"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector")
});

/// Elements whose text is never article content.
const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "iframe", "aside", "form", "noscript",
];

/// Content-area selectors, most specific first.
pub const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[itemprop=articleBody]",
    ".article-body",
    ".article-content",
    ".story-body",
    ".entry-content",
    ".post-content",
    "#content",
    ".content",
];

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn inside_non_content(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| NON_CONTENT_TAGS.contains(&a.value().name()))
}

fn join_paragraphs<'a>(paragraphs: impl Iterator<Item = ElementRef<'a>>) -> Option<String> {
    let text = paragraphs
        .map(|p| normalize_ws(&p.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (!text.is_empty()).then_some(text)
}

/// Paragraph text under `root`, skipping paragraphs inside non-content tags.
pub fn filtered_paragraphs(root: ElementRef<'_>) -> Option<String> {
    join_paragraphs(root.select(&P).filter(|p| !inside_non_content(p)))
}

fn find_article_body(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(body) = map.get("articleBody").and_then(|b| b.as_str()) {
                let body = body.trim();
                if !body.is_empty() {
                    return Some(body.to_string());
                }
            }
            map.get("@graph").and_then(find_article_body)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_article_body),
        _ => None,
    }
}

/// `articleBody` from the page's JSON-LD, searching `@graph` arrays too.
pub fn json_ld_body(document: &Html) -> Option<String> {
    document.select(&JSON_LD).find_map(|script| {
        let raw = script.text().collect::<String>();
        serde_json::from_str::<serde_json::Value>(raw.trim())
            .ok()
            .and_then(|v| find_article_body(&v))
    })
}

/// Main body as scored by a readability pass over the raw page.
///
/// Readability falls back to the whole document when nothing scores, so a
/// short result here is normal for thin pages.
pub fn readability_text(html: &str, url: &Url) -> Option<String> {
    let product = extractor::extract(&mut html.as_bytes(), url).ok()?;
    let text = product
        .text
        .lines()
        .map(normalize_ws)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (!text.is_empty()).then_some(text)
}

/// Paragraphs of the first content region whose text is longer than
/// `min_chars`, trying [`CONTENT_SELECTORS`] in order.
pub fn content_selectors(document: &Html, min_chars: usize) -> Option<String> {
    CONTENT_SELECTORS.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        document
            .select(&selector)
            .filter_map(filtered_paragraphs)
            .find(|text| text.chars().count() > min_chars)
    })
}

/// Every paragraph on the page, unfiltered.
pub fn all_paragraphs(document: &Html) -> Option<String> {
    join_paragraphs(document.select(&P))
}

/// Concatenated text of all elements matching `selectors`, in selector order.
pub fn text_of(document: &Html, selectors: &[&str]) -> Option<String> {
    let mut parts = Vec::new();
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = normalize_ws(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    (!parts.is_empty()).then(|| parts.join("\n"))
}
