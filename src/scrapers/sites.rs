//! Handlers for sources whose main pages resist generic extraction.
//!
//! Each handler rewrites an article URL to the outlet's text-only edition,
//! which carries the whole story in a few stable elements:
//!
//! | Outlet | Text edition | Selectors |
//! |--------|--------------|-----------|
//! | CNN | `lite.cnn.com` + same path | `.headline--lite`, `.article--lite` |
//! | NPR | `text.npr.org/<story id>` | `.story-head`, `.paragraphs-container` |
//!
//! Edition base URLs come from [`TextEditions`].

use url::Url;

use crate::config::TextEditions;

/// A resolved site-specific fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRoute {
    pub site: &'static str,
    pub fetch_url: String,
    pub selectors: &'static [&'static str],
}

const CNN_SELECTORS: &[&str] = &[".headline--lite", ".article--lite"];
const NPR_SELECTORS: &[&str] = &[".story-head", ".paragraphs-container"];

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Find the text-edition route for `url`, if its host has a handler.
pub fn route_for(url: &Url, editions: &TextEditions) -> Option<SiteRoute> {
    let host = url.host_str()?.to_ascii_lowercase();

    if host_matches(&host, "cnn.com") {
        return Some(SiteRoute {
            site: "cnn",
            fetch_url: format!("{}{}", editions.cnn.trim_end_matches('/'), url.path()),
            selectors: CNN_SELECTORS,
        });
    }

    if host_matches(&host, "npr.org") {
        if host == "text.npr.org" {
            return Some(SiteRoute {
                site: "npr",
                fetch_url: url.to_string(),
                selectors: NPR_SELECTORS,
            });
        }
        // /2025/07/20/nx-s1-5477770/slug -> text.npr.org/nx-s1-5477770
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let dated = segments.len() >= 4
            && segments[..3]
                .iter()
                .all(|s| s.chars().all(|c| c.is_ascii_digit()));
        if !dated {
            return None;
        }
        return Some(SiteRoute {
            site: "npr",
            fetch_url: format!("{}/{}", editions.npr.trim_end_matches('/'), segments[3]),
            selectors: NPR_SELECTORS,
        });
    }

    None
}
