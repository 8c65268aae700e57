//! Article text scraping with ordered fallback strategies.
//!
//! Given an article URL, [`Scraper::scrape`] walks its strategy list in order
//! and returns the first text longer than the configured minimum:
//!
//! | # | Strategy | Source |
//! |---|----------|--------|
//! | 1 | [`Strategy::StructuredArticle`] | JSON-LD `articleBody`, else a readability pass |
//! | 2 | [`Strategy::ContentSelectors`] | Known content regions, non-content tags dropped |
//! | 3 | [`Strategy::AllParagraphs`] | Every `<p>` on the page |
//! | 4 | [`Strategy::SiteHandler`] | Text-only edition for known outlets ([`sites`]) |
//!
//! The page is downloaded and parsed at most once per scrape (with bounded
//! retries) and shared by strategies 1-3. A scrape never fails: when nothing qualifies the
//! outcome simply carries no text and the caller falls back to API snippets.

pub mod extract;
pub mod sites;

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use scraper::Html;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::{NewsError, Result};

/// One extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    StructuredArticle,
    ContentSelectors,
    AllParagraphs,
    SiteHandler,
}

impl Strategy {
    /// The default priority order.
    pub const ORDERED: [Strategy; 4] = [
        Strategy::StructuredArticle,
        Strategy::ContentSelectors,
        Strategy::AllParagraphs,
        Strategy::SiteHandler,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::StructuredArticle => "structured-article",
            Self::ContentSelectors => "content-selectors",
            Self::AllParagraphs => "all-paragraphs",
            Self::SiteHandler => "site-handler",
        }
    }

    /// Run a page-based strategy against a downloaded page.
    fn extract_from(&self, page: &Page, min_chars: usize) -> Option<String> {
        match self {
            Self::StructuredArticle => extract::json_ld_body(&page.document).or_else(|| {
                page.url
                    .as_ref()
                    .and_then(|url| extract::readability_text(&page.raw, url))
            }),
            Self::ContentSelectors => extract::content_selectors(&page.document, min_chars),
            Self::AllParagraphs => extract::all_paragraphs(&page.document),
            Self::SiteHandler => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A downloaded article page, parsed once.
struct Page {
    raw: String,
    document: Html,
    url: Option<Url>,
}

/// Result of one scrape.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    /// Extracted text, present only when a strategy met the threshold.
    pub text: Option<String>,
    /// The strategy that produced `text`.
    pub strategy: Option<Strategy>,
    /// Every strategy that ran, in order.
    pub attempted: Vec<Strategy>,
}

/// Article scraper.
pub struct Scraper {
    http: Client,
    config: ScraperConfig,
    strategies: Vec<Strategy>,
}

impl fmt::Debug for Scraper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scraper")
            .field("min_chars", &self.config.min_chars)
            .field("strategies", &self.strategies)
            .finish()
    }
}

impl Scraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::from_client(http, config))
    }

    /// Use an already configured HTTP client.
    pub fn from_client(http: Client, config: &ScraperConfig) -> Self {
        Self {
            http,
            config: config.clone(),
            strategies: Strategy::ORDERED.to_vec(),
        }
    }

    /// Replace the strategy list (order is priority).
    #[cfg(test)]
    pub(crate) fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    fn long_enough(&self, text: &str) -> bool {
        text.chars().count() > self.config.min_chars
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NewsError::scrape(format!("HTTP {status}")));
        }
        Ok(resp.text().await?)
    }

    /// GET `url` as text, retrying up to `max_attempts` with a fixed backoff.
    #[instrument(level = "debug", skip(self))]
    async fn download(&self, url: &str) -> Result<String> {
        let attempts = self.config.max_attempts.max(1);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut last_err = NewsError::scrape("no attempt made");

        for attempt in 1..=attempts {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(attempt, max = attempts, error = %e, "Page download failed");
                    last_err = e;
                    if attempt < attempts {
                        sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn load_page(&self, url: &str) -> Option<Page> {
        match self.download(url).await {
            Ok(raw) => Some(Page {
                document: Html::parse_document(&raw),
                url: Url::parse(url).ok(),
                raw,
            }),
            Err(e) => {
                warn!(error = %e, "Article page unavailable");
                None
            }
        }
    }

    async fn site_handler(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let route = sites::route_for(&parsed, &self.config.text_editions)?;
        debug!(site = route.site, fetch_url = %route.fetch_url, "Trying site handler");
        let body = self.download(&route.fetch_url).await.ok()?;
        let document = Html::parse_document(&body);
        extract::text_of(&document, route.selectors)
    }

    /// Run the strategy list against `url`; first qualifying text wins.
    ///
    /// Strategies run in priority order and stop at the first one whose text is
    /// longer than `min_chars`. Download failures are logged, never returned.
    ///
    /// # Arguments
    ///
    /// * `url` - The article page to extract
    ///
    /// # Returns
    ///
    /// A [`ScrapeOutcome`] with the text and winning strategy, or with only
    /// `attempted` filled when nothing qualified.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let scraper = Scraper::new(&config.scraper)?;
    /// let outcome = scraper.scrape("https://www.cnn.com/2025/07/20/politics/vote").await;
    /// if let Some(text) = outcome.text { /* enrich */ }
    /// ```
    #[instrument(level = "info", skip(self), fields(%url))]
    pub async fn scrape(&self, url: &str) -> ScrapeOutcome {
        let mut outcome = ScrapeOutcome::default();
        // None = not fetched yet, Some(None) = fetch failed.
        let mut page: Option<Option<Page>> = None;

        for &strategy in &self.strategies {
            outcome.attempted.push(strategy);

            let text = match strategy {
                Strategy::SiteHandler => self.site_handler(url).await,
                _ => {
                    if page.is_none() {
                        page = Some(self.load_page(url).await);
                    }
                    page.as_ref()
                        .and_then(Option::as_ref)
                        .and_then(|p| strategy.extract_from(p, self.config.min_chars))
                }
            };

            match text {
                Some(text) if self.long_enough(&text) => {
                    info!(strategy = %strategy, chars = text.chars().count(), "Extracted article text");
                    outcome.text = Some(text);
                    outcome.strategy = Some(strategy);
                    return outcome;
                }
                Some(text) => {
                    debug!(strategy = %strategy, chars = text.chars().count(), "Text below threshold")
                }
                None => debug!(strategy = %strategy, "Strategy found nothing"),
            }
        }

        info!(attempted = outcome.attempted.len(), "No strategy produced enough text");
        outcome
    }
}
