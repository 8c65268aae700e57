//! HTML rendering for the static site.
//!
//! Cards are injected into a template at [`CARDS_PLACEHOLDER`]. The full
//! article list is embedded as JSON in `<script id="articles-data">`, placed at
//! [`DATA_PLACEHOLDER`] when the template has it, else just before `</body>`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::config::SiteConfig;
use crate::error::{NewsError, Result};
use crate::outputs::json::{ArticleView, articles_json, write_articles_json};
use crate::store::ArticleStore;
use crate::utils::{ensure_writable_dir, escape_html};

pub const CARDS_PLACEHOLDER: &str = "{/* News cards inserted here */}";
pub const DATA_PLACEHOLDER: &str = "{/* Articles data inserted here */}";

const BUILTIN_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>News Timeline</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 0; background: #f4f4f4; color: #222; }
    header { padding: 1.5rem 2rem; background: #111; color: #fff; }
    .news-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 1.25rem; padding: 2rem; }
    .news-card { background: #fff; border-radius: 8px; overflow: hidden; box-shadow: 0 1px 3px rgba(0,0,0,.15); }
    .news-card img { width: 100%; height: 160px; object-fit: cover; }
    .card-content { padding: .75rem 1rem 1rem; }
    .card-content h6 { font-size: 1rem; margin: 0 0 .5rem; }
    .caption { font-size: .8rem; color: #666; margin-bottom: .75rem; }
    .category { display: inline-block; font-size: .7rem; text-transform: uppercase; color: #0a58ca; margin-bottom: .25rem; }
  </style>
</head>
<body>
  <header><h1>News Timeline</h1></header>
  <main class="news-grid">
{/* News cards inserted here */}
  </main>
{/* Articles data inserted here */}
</body>
</html>
"#;

/// What [`build_site`] wrote.
#[derive(Debug, Clone)]
pub struct SiteSummary {
    pub articles: usize,
    pub index_path: PathBuf,
    pub json_path: PathBuf,
}

fn render_card(view: &ArticleView<'_>, default_image: &str) -> String {
    let record = view.record;
    let image = record
        .image_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(default_image);
    let title = Some(record.generated_title.as_str())
        .filter(|t| !t.trim().is_empty())
        .or(record.original_title.as_deref())
        .unwrap_or("Untitled");
    let default_image = escape_html(default_image);

    format!(
        r#"    <div class="news-card">
      <img src="{image}" alt="" onerror="this.onerror=null;this.src='{default_image}';">
      <div class="card-content">
        <span class="category">{category}</span>
        <h6>{title}</h6>
        <div class="caption">{source} | {date}</div>
        <button data-article-id="{url}">Read Article</button>
      </div>
    </div>
"#,
        image = escape_html(image),
        category = escape_html(record.category.label()),
        title = escape_html(title),
        source = escape_html(&view.source_display),
        date = escape_html(&view.published_at_formatted),
        url = escape_html(&record.url),
    )
}

/// Render the full page from `template`.
pub fn render_index(template: &str, views: &[ArticleView<'_>], default_image: &str) -> Result<String> {
    let cards = if views.is_empty() {
        "    <div id=\"no-results-message\" style=\"grid-column: 1 / -1; text-align: center;\">No articles found.</div>\n".to_string()
    } else {
        views.iter().map(|v| render_card(v, default_image)).collect()
    };

    // `</` inside the JSON would close the script element early.
    let data = articles_json(views)?.replace("</", "<\\/");
    let script = format!(r#"<script id="articles-data" type="application/json">{data}</script>"#);

    let mut html = template.to_string();
    let script_at = match html.find(DATA_PLACEHOLDER) {
        Some(pos) => {
            html.replace_range(pos..pos + DATA_PLACEHOLDER.len(), &script);
            pos
        }
        None => {
            let pos = html.rfind("</body>").unwrap_or(html.len());
            html.insert_str(pos, &format!("{script}\n"));
            pos
        }
    };

    // Skip placeholder text that arrived inside the embedded data.
    let script_range = script_at..script_at + script.len();
    let cards_at = html
        .match_indices(CARDS_PLACEHOLDER)
        .map(|(i, _)| i)
        .find(|i| !script_range.contains(i));
    if let Some(pos) = cards_at {
        html.replace_range(pos..pos + CARDS_PLACEHOLDER.len(), &cards);
    }
    Ok(html)
}

async fn load_template(config: &SiteConfig) -> Result<String> {
    match &config.template {
        Some(path) => {
            let template = fs::read_to_string(path)
                .await
                .map_err(|e| NewsError::io(path, e))?;
            if !template.contains(CARDS_PLACEHOLDER) {
                warn!(path = %path.display(), "Template has no cards placeholder; cards will be omitted");
            }
            Ok(template)
        }
        None => Ok(BUILTIN_TEMPLATE.to_string()),
    }
}

/// Render every stored article, newest first, into `config.output_dir`.
#[instrument(level = "info", skip_all, fields(output_dir = %config.output_dir.display()))]
pub async fn build_site(store: &ArticleStore, config: &SiteConfig, now: DateTime<Utc>) -> Result<SiteSummary> {
    let records = store.all_newest_first().await?;
    info!(count = records.len(), "Loaded articles");

    let views: Vec<ArticleView<'_>> = records.iter().map(|r| ArticleView::new(r, now)).collect();
    let template = load_template(config).await?;
    let html = render_index(&template, &views, &config.default_image)?;

    let out: &Path = &config.output_dir;
    ensure_writable_dir(out).await?;
    let index_path = out.join("index.html");
    fs::write(&index_path, html)
        .await
        .map_err(|e| NewsError::io(&index_path, e))?;
    let json_path = write_articles_json(&views, out).await?;

    info!(path = %index_path.display(), "Site built");
    Ok(SiteSummary {
        articles: views.len(),
        index_path,
        json_path,
    })
}
