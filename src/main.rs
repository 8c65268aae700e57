//! # News Timeline
//!
//! A daily news ingestion pipeline that fetches article listings from a news
//! API, scrapes the full text of each article, asks an LLM for a headline,
//! historical timeline, glossary, category and summary bullets, and stores the
//! result in a SQLite-compatible (libSQL) database keyed by article URL.
//!
//! ## Usage
//!
//! ```sh
//! news_timeline update                          # ingest since the last processed day
//! news_timeline articles --category Politics    # query the store
//! news_timeline filter-options                  # categories and date buckets
//! news_timeline build-site                      # render public/index.html
//! ```
//!
//! ## Architecture
//!
//! `update` runs a sequential pipeline, one article end to end at a time:
//! 1. **Fetching**: list one day's articles from the news API
//! 2. **Scraping**: extract full text with ordered fallback strategies
//! 3. **Enrichment**: structured LLM output, validated or rejected whole
//! 4. **Storage**: upsert by URL; the latest stored date is the resume watermark

use std::error::Error;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod enrich;
mod error;
mod models;
mod news_api;
mod outputs;
mod pipeline;
mod scrapers;
mod store;
mod utils;

use cli::{Cli, Command};
use config::{Credentials, load_config};
use outputs::json::ArticleView;
use outputs::site::build_site;
use pipeline::Pipeline;
use store::ArticleStore;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();

    let args = Cli::parse();
    debug!(?args.config, ?args.database, "Parsed CLI arguments");

    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = &args.database {
        config.database.path = path.clone();
    }

    match args.command {
        Command::Update(keys) => {
            // Refuse to run at all without both keys.
            let credentials = match Credentials::require(
                keys.news_api_key.as_deref(),
                keys.openai_api_key.as_deref(),
            ) {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "Cannot run the pipeline without API keys");
                    return Err(e.into());
                }
            };
            info!("news_timeline update starting up");

            let store = ArticleStore::connect(&config.database, args.turso_auth_token.as_deref()).await?;
            let pipeline = Pipeline::from_config(&config, &credentials, store)?;
            let report = pipeline.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            match pipeline.store().count().await {
                Ok(total) => info!(
                    saved = report.new_articles_count,
                    errors = report.details.errors.len(),
                    total_stored = total,
                    elapsed_ms_total = start_time.elapsed().as_millis(),
                    "news_timeline update finished"
                ),
                Err(e) => warn!(error = %e, "Could not count stored articles after the run"),
            }
        }
        Command::Articles(filters) => {
            let store = ArticleStore::connect(&config.database, args.turso_auth_token.as_deref()).await?;
            let records = store.query(&filters.to_query()).await?;
            let now = Utc::now();
            let views: Vec<ArticleView<'_>> = records.iter().map(|r| ArticleView::new(r, now)).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Command::FilterOptions => {
            let store = ArticleStore::connect(&config.database, args.turso_auth_token.as_deref()).await?;
            let options = store.filter_options().await?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
        Command::BuildSite { output_dir } => {
            if let Some(dir) = output_dir {
                config.site.output_dir = dir;
            }
            let store = ArticleStore::connect(&config.database, args.turso_auth_token.as_deref()).await?;
            let summary = build_site(&store, &config.site, Utc::now()).await?;
            info!(
                articles = summary.articles,
                index = %summary.index_path.display(),
                json = %summary.json_path.display(),
                elapsed_ms_total = start_time.elapsed().as_millis(),
                "Site generated"
            );
        }
    }

    Ok(())
}
