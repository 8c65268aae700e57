//! Data models for fetched, enriched and stored articles.
//!
//! - [`RawArticle`]: one record from the news listing API
//! - [`Enrichment`]: the validated structured output of the language model
//! - [`ArticleRecord`]: one stored row, keyed by source URL
//! - [`Category`]: the closed set of categories an article may carry

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw article as returned by the news listing API.
///
/// Field names follow the API's camelCase JSON; any of them may be null.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub title: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub source: ArticleSource,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url_to_image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ArticleSource {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// The fixed set of article categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Category {
    Politics,
    Business,
    Technology,
    Health,
    Science,
    Sports,
    Entertainment,
    #[serde(rename = "World News")]
    WorldNews,
    #[serde(rename = "US News")]
    UsNews,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Politics,
        Category::Business,
        Category::Technology,
        Category::Health,
        Category::Science,
        Category::Sports,
        Category::Entertainment,
        Category::WorldNews,
        Category::UsNews,
        Category::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Politics => "Politics",
            Self::Business => "Business",
            Self::Technology => "Technology",
            Self::Health => "Health",
            Self::Science => "Science",
            Self::Sports => "Sports",
            Self::Entertainment => "Entertainment",
            Self::WorldNews => "World News",
            Self::UsNews => "US News",
            Self::Other => "Other",
        }
    }

    /// Match a free-text label against the set, ignoring case and surrounding
    /// whitespace. Returns `None` for anything outside the set.
    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(wanted))
    }

    /// Like [`Category::from_label`] but maps unknown labels to `Other`.
    pub fn from_label_or_other(label: &str) -> Self {
        Self::from_label(label).unwrap_or(Self::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of the historical-context timeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimelineEntry {
    /// Year or period, e.g. `"1948"` or `"1990s"`.
    pub year: String,
    pub title: String,
    pub summary: String,
}

/// One glossary definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GlossaryEntry {
    pub term: String,
    pub definition: String,
}

/// A fully validated enrichment result. Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrichment {
    pub title: String,
    pub timeline: Vec<TimelineEntry>,
    pub glossary: Vec<GlossaryEntry>,
    pub category: Category,
    pub summary_bullets: Vec<String>,
}

/// One stored article, keyed by `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub url: String,
    pub original_title: Option<String>,
    pub generated_title: String,
    pub author: Option<String>,
    pub source_name: Option<String>,
    /// Timestamp exactly as the news API sent it.
    pub published_at: Option<String>,
    /// RFC 3339 UTC form of `published_at`, used for sorting and the watermark.
    pub published_at_normalized: Option<String>,
    pub description: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub category: Category,
    pub timeline_entries: Vec<TimelineEntry>,
    pub glossary_entries: Vec<GlossaryEntry>,
    pub summary_bullets: Vec<String>,
    /// Which extraction strategy or fallback produced `content`.
    pub content_source_tag: String,
    pub last_updated: String,
}

impl ArticleRecord {
    /// Assemble a record from the fetched metadata, the chosen content and the
    /// enrichment result.
    pub fn assemble(
        raw: &RawArticle,
        url: &str,
        content: String,
        content_source_tag: String,
        enrichment: Enrichment,
    ) -> Self {
        let published_at = raw.published_at.clone();
        let published_at_normalized = published_at.as_deref().and_then(normalize_published_at);
        Self {
            url: url.to_string(),
            original_title: raw.title.clone(),
            generated_title: enrichment.title,
            author: raw.author.clone(),
            source_name: raw.source.name.clone(),
            published_at,
            published_at_normalized,
            description: raw.description.clone(),
            content,
            image_url: raw.url_to_image.clone(),
            category: enrichment.category,
            timeline_entries: enrichment.timeline,
            glossary_entries: enrichment.glossary,
            summary_bullets: enrichment.summary_bullets,
            content_source_tag,
            last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Source name for display, falling back to the URL's domain
    /// (`"https://lite.cnn.com/x"` -> `"cnn"`).
    pub fn display_source(&self) -> String {
        if let Some(name) = self.source_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                let host = u.host_str()?.to_string();
                let parts: Vec<&str> = host.split('.').collect();
                (parts.len() >= 2).then(|| parts[parts.len() - 2].to_string())
            })
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Normalize a published timestamp to RFC 3339 UTC with second precision.
///
/// Accepts RFC 3339 with any offset, naive `YYYY-MM-DDTHH:MM:SS` (taken as
/// UTC) and bare dates. Returns `None` for anything else.
pub fn normalize_published_at(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let utc: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.with_timezone(&Utc)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        naive.and_utc()
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        naive.and_utc()
    } else if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        return None;
    };
    Some(utc.to_rfc3339_opts(SecondsFormat::Secs, true))
}
