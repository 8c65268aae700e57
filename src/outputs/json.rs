//! JSON output for the static site.
//!
//! Each article is serialized with its stored fields plus two presentation
//! fields, `published_at_formatted` and `source_display`, so front ends do
//! not need to repeat the date and source fallbacks.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, instrument};

use crate::error::{NewsError, Result};
use crate::models::ArticleRecord;
use crate::utils::format_date_for_display;

pub const ARTICLES_JSON: &str = "articles.json";

/// An article as published to the site.
#[derive(Debug, Serialize)]
pub struct ArticleView<'a> {
    #[serde(flatten)]
    pub record: &'a ArticleRecord,
    pub published_at_formatted: String,
    pub source_display: String,
}

impl<'a> ArticleView<'a> {
    pub fn new(record: &'a ArticleRecord, now: DateTime<Utc>) -> Self {
        Self {
            record,
            published_at_formatted: format_date_for_display(
                record.published_at_normalized.as_deref(),
                now,
            ),
            source_display: record.display_source(),
        }
    }
}

/// Serialize views as a compact JSON array.
pub fn articles_json(views: &[ArticleView<'_>]) -> Result<String> {
    Ok(serde_json::to_string(views)?)
}

/// Write `{output_dir}/articles.json`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display(), count = views.len()))]
pub async fn write_articles_json(views: &[ArticleView<'_>], output_dir: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(views)?;
    let path = output_dir.join(ARTICLES_JSON);
    fs::write(&path, json)
        .await
        .map_err(|e| NewsError::io(&path, e))?;
    info!(path = %path.display(), "Wrote articles JSON");
    Ok(path)
}
