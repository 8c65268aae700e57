//! Command-line interface definitions for News Timeline.
//!
//! Global options select the config file and database; each subcommand maps to
//! one operation. API keys can be passed as flags or environment variables.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::models::Category;
use crate::store::{ArticleQuery, SortOrder};

/// Command-line arguments for the News Timeline application.
///
/// # Examples
///
/// ```sh
/// # Ingest everything since the last run
/// NEWS_API_KEY=... OPENAI_API_KEY=... news_timeline update
///
/// # Politics stories from July, newest first
/// news_timeline articles --category Politics --month 2025-07
///
/// # Render public/index.html
/// news_timeline build-site
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides `database.path`)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Auth token for a remote libSQL database (`database.remote_url`)
    #[arg(long, global = true, env = "TURSO_AUTH_TOKEN", hide_env_values = true)]
    pub turso_auth_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, scrape, enrich and store articles since the last processed day
    Update(UpdateArgs),
    /// List stored articles as JSON
    Articles(ArticlesArgs),
    /// Print available categories and date buckets as JSON
    FilterOptions,
    /// Render the static site from the store
    BuildSite {
        /// Output directory (overrides `site.output_dir`)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// News listing API key
    #[arg(long, env = "NEWS_API_KEY", hide_env_values = true)]
    pub news_api_key: Option<String>,

    /// OpenAI-compatible API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct ArticlesArgs {
    /// Exact category, e.g. "World News"
    #[arg(long, value_parser = parse_category)]
    pub category: Option<Category>,

    /// Case-insensitive text search
    #[arg(short, long)]
    pub search: Option<String>,

    /// Month as YYYY-MM
    #[arg(long, value_parser = parse_month)]
    pub month: Option<String>,

    /// Day of month
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=31))]
    pub day: Option<u32>,

    /// newest, oldest, title-asc or title-desc
    #[arg(long, default_value = "newest")]
    pub sort: SortOrder,

    #[arg(short, long)]
    pub limit: Option<u32>,
}

impl ArticlesArgs {
    pub fn to_query(&self) -> ArticleQuery {
        ArticleQuery {
            category: self.category,
            search: self.search.clone(),
            month: self.month.clone(),
            day: self.day,
            sort: self.sort,
            limit: self.limit,
        }
    }
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::from_label(s).ok_or_else(|| {
        let known: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
        format!("unknown category `{s}` (one of: {})", known.join(", "))
    })
}

fn parse_month(s: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m").to_string())
        .map_err(|_| format!("month must be YYYY-MM, got `{s}`"))
}
