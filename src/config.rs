//! Application configuration.
//!
//! Settings live in a YAML file (default `config.yaml` next to the binary's
//! working directory). Every section has defaults, so an absent file is the
//! same as an empty one. API keys are never read from the file; they come from
//! the environment through [`Credentials`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NewsError, Result};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub news_api: NewsApiConfig,
    pub llm: LlmConfig,
    pub scraper: ScraperConfig,
    pub pipeline: PipelineConfig,
    pub site: SiteConfig,
}

/// `database:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Local SQLite file.
    pub path: PathBuf,
    /// libSQL / Turso URL. When set, `TURSO_AUTH_TOKEN` must be too.
    pub remote_url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("news_data.db"),
            remote_url: None,
        }
    }
}

/// `news_api:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsApiConfig {
    pub base_url: String,
    /// `everything` or `top-headlines`.
    pub endpoint: String,
    pub query: String,
    pub language: String,
    pub country: Option<String>,
    pub sort_by: String,
    pub page_size: u32,
    pub exclude_domains: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for NewsApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://newsapi.org/v2".into(),
            endpoint: "everything".into(),
            query: "news".into(),
            language: "en".into(),
            country: None,
            sort_by: "popularity".into(),
            page_size: 100,
            exclude_domains: [
                "wsj.com",
                "nytimes.com",
                "ft.com",
                "bloomberg.com",
                "economist.com",
                "latimes.com",
                "washingtonpost.com",
                "businessinsider.com",
                "theathletic.com",
                "newyorker.com",
                "thetimes.co.uk",
                "financialpost.com",
                "lemonde.fr",
                "telegraph.co.uk",
                "irishtimes.com",
                "sueddeutsche.de",
                "handelsblatt.com",
                "nzz.ch",
                "chron.com",
                "bostonglobe.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            timeout_secs: 15,
        }
    }
}

/// `llm:` section. Any OpenAI-compatible chat completions endpoint works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Article text beyond this many characters is dropped before the request.
    pub max_input_chars: usize,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            temperature: 0.3,
            max_input_chars: 15_000,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            timeout_secs: 120,
        }
    }
}

/// `scraper:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Extracted text must be longer than this to count as a success.
    pub min_chars: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub text_editions: TextEditions,
}

/// Base URLs of the text-only editions used by the site handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextEditions {
    /// Article path is appended unchanged.
    pub cnn: String,
    /// Story id is appended as the only path segment.
    pub npr: String,
}

impl Default for TextEditions {
    fn default() -> Self {
        Self {
            cnn: "https://lite.cnn.com".into(),
            npr: "https://text.npr.org".into(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            min_chars: 200,
            timeout_secs: 20,
            max_attempts: 2,
            retry_backoff_ms: 1_000,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/124.0 Safari/537.36"
                .into(),
            text_editions: TextEditions::default(),
        }
    }
}

/// Upper bound on `pipeline.lookback_days` (ten years).
pub const MAX_LOOKBACK_DAYS: i64 = 3_650;

/// `pipeline:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How far back an empty store starts.
    pub lookback_days: i64,
    pub article_delay_ms: u64,
    pub day_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            article_delay_ms: 1_000,
            day_delay_ms: 2_000,
        }
    }
}

/// `site:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub output_dir: PathBuf,
    pub default_image: String,
    /// Custom HTML template; the built-in one is used when absent.
    pub template: Option<PathBuf>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("public"),
            default_image: "https://images.unsplash.com/photo-1586339949916-3e9457bef6d3?ixlib=rb-4.0.3&auto=format&fit=crop&w=600&q=80".into(),
            template: None,
        }
    }
}

/// Load config from `path`, or from [`DEFAULT_CONFIG_FILE`] when `path` is `None`.
///
/// An explicitly named file must exist; the default file may be absent.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => load_config_from(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                load_config_from(default)
            } else {
                tracing::debug!(path = %default.display(), "config file not found, using defaults");
                Ok(AppConfig::default())
            }
        }
    }
}

/// Load config from a specific file.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NewsError::io(path, e))?;
    let config: AppConfig = serde_yaml::from_str(&content)
        .map_err(|e| NewsError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    /// Reject values that would make the pipeline misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.llm.max_input_chars == 0 {
            return Err(NewsError::config("llm.max_input_chars must be positive"));
        }
        if self.scraper.max_attempts == 0 {
            return Err(NewsError::config("scraper.max_attempts must be at least 1"));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.pipeline.lookback_days) {
            return Err(NewsError::config(format!(
                "pipeline.lookback_days must be between 0 and {MAX_LOOKBACK_DAYS}, got {}",
                self.pipeline.lookback_days
            )));
        }
        if !matches!(self.news_api.endpoint.as_str(), "everything" | "top-headlines") {
            return Err(NewsError::config(format!(
                "news_api.endpoint must be `everything` or `top-headlines`, got `{}`",
                self.news_api.endpoint
            )));
        }
        Ok(())
    }
}

/// API keys required by the ingestion pipeline.
#[derive(Clone)]
pub struct Credentials {
    pub news_api_key: String,
    pub llm_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("news_api_key", &"<redacted>")
            .field("llm_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Build credentials, failing with every missing key named.
    pub fn require(news_api_key: Option<&str>, llm_api_key: Option<&str>) -> Result<Self> {
        let news = news_api_key.map(str::trim).filter(|k| !k.is_empty());
        let llm = llm_api_key.map(str::trim).filter(|k| !k.is_empty());

        match (news, llm) {
            (Some(n), Some(l)) => Ok(Self {
                news_api_key: n.to_string(),
                llm_api_key: l.to_string(),
            }),
            _ => {
                let mut missing = Vec::new();
                if news.is_none() {
                    missing.push("NEWS_API_KEY");
                }
                if llm.is_none() {
                    missing.push("OPENAI_API_KEY");
                }
                Err(NewsError::Credentials(missing.join(", ")))
            }
        }
    }
}
