//! Day-by-day ingestion: fetch, scrape, enrich, store.
//!
//! The run starts the day after the store's watermark (or `lookback_days`
//! before today on an empty store) and walks forward to today inclusive. Each
//! article is handled end to end before the next; a failed article is recorded
//! in the report and skipped. Nothing short of a broken store connection at
//! start-up stops a run.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::{AppConfig, Credentials, PipelineConfig};
use crate::enrich::{AskAsync, Completion, Enricher, OpenAiClient, RetryAsk};
use crate::error::{EnrichError, NewsError, Result};
use crate::models::{ArticleRecord, RawArticle};
use crate::news_api::NewsApiClient;
use crate::scrapers::{ScrapeOutcome, Scraper};
use crate::store::ArticleStore;
use crate::utils::clean_snippet;

/// Why an article was not stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("missing or invalid URL `{0}`")]
    InvalidUrl(String),

    #[error("no usable content from scraping, API snippet or description")]
    NoContent,

    #[error("enrichment failed: {0}")]
    Enrichment(#[from] EnrichError),

    #[error("store write failed: {0}")]
    Store(String),
}

/// One skipped article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub date: String,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDetails {
    pub dates_processed: Vec<String>,
    pub articles_per_date: BTreeMap<String, usize>,
    pub errors: Vec<RunError>,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// True iff at least one article was saved.
    pub success: bool,
    pub message: String,
    pub new_articles_count: usize,
    pub details: RunDetails,
}

impl RunReport {
    fn finish(details: RunDetails) -> Self {
        let saved: usize = details.articles_per_date.values().sum();
        let message = if saved > 0 {
            format!(
                "Saved {saved} new articles across {} days",
                details.dates_processed.len()
            )
        } else if details.dates_processed.is_empty() {
            "Already up to date; no days to process".to_string()
        } else {
            "No new articles were saved".to_string()
        };
        Self {
            success: saved > 0,
            message,
            new_articles_count: saved,
            details,
        }
    }
}

/// Text to enrich and a tag naming where it came from.
fn choose_content(raw: &RawArticle, scraped: ScrapeOutcome) -> Option<(String, String)> {
    if let (Some(text), Some(strategy)) = (scraped.text, scraped.strategy) {
        return Some((text, format!("scraped:{strategy}")));
    }
    if let Some(snippet) = raw
        .content
        .as_deref()
        .map(clean_snippet)
        .filter(|s| !s.is_empty())
    {
        return Some((snippet, "api-content-snippet".to_string()));
    }
    raw.description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| (d.to_string(), "api-description".to_string()))
}

fn valid_url(raw: &RawArticle) -> std::result::Result<String, SkipReason> {
    let candidate = raw.url.as_deref().map(str::trim).unwrap_or_default();
    match Url::parse(candidate) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(candidate.to_string()),
        _ => Err(SkipReason::InvalidUrl(candidate.to_string())),
    }
}

/// The ingestion pipeline and the components it drives.
pub struct Pipeline<A> {
    news: NewsApiClient,
    scraper: Scraper,
    enricher: Enricher<A>,
    store: ArticleStore,
    config: PipelineConfig,
}

impl Pipeline<RetryAsk<OpenAiClient>> {
    /// Production wiring from config and credentials.
    pub fn from_config(config: &AppConfig, credentials: &Credentials, store: ArticleStore) -> Result<Self> {
        Ok(Self::new(
            NewsApiClient::new(&config.news_api, credentials.news_api_key.clone())?,
            Scraper::new(&config.scraper)?,
            Enricher::openai(&config.llm, credentials.llm_api_key.clone())?,
            store,
            &config.pipeline,
        ))
    }
}

impl<A> Pipeline<A>
where
    A: AskAsync<Response = Completion>,
{
    pub fn new(
        news: NewsApiClient,
        scraper: Scraper,
        enricher: Enricher<A>,
        store: ArticleStore,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            news,
            scraper,
            enricher,
            store,
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    /// First day to process given the watermark.
    pub async fn start_date(&self, today: NaiveDate) -> Result<NaiveDate> {
        match self.store.latest_processed_date().await? {
            Some(watermark) => watermark
                .checked_add_days(Days::new(1))
                .ok_or_else(|| NewsError::storage(format!("watermark {watermark} has no following day"))),
            None => today
                .checked_sub_days(Days::new(self.config.lookback_days.max(0) as u64))
                .ok_or_else(|| {
                    NewsError::config(format!(
                        "pipeline.lookback_days = {} reaches before the earliest date",
                        self.config.lookback_days
                    ))
                }),
        }
    }

    /// Run from the watermark up to the current UTC date.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_until(Utc::now().date_naive()).await
    }

    /// Run from the watermark up to `today` inclusive.
    ///
    /// Days are processed in order and articles one at a time. A failed article
    /// lands in the report's `errors` and the run moves on.
    ///
    /// # Arguments
    ///
    /// * `today` - Last day to fetch, as a UTC date
    ///
    /// # Returns
    ///
    /// The [`RunReport`] for the run. Errors only when the start date cannot
    /// be determined.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pipeline = Pipeline::from_config(&config, &credentials, store)?;
    /// let report = pipeline.run_until(Utc::now().date_naive()).await?;
    /// println!("saved {}", report.new_articles_count);
    /// ```
    #[instrument(level = "info", skip(self))]
    pub async fn run_until(&self, today: NaiveDate) -> Result<RunReport> {
        let start = self.start_date(today).await?;
        let mut details = RunDetails::default();

        if start > today {
            info!(%start, "Store is caught up; nothing to fetch");
            return Ok(RunReport::finish(details));
        }
        info!(%start, %today, "Starting ingestion");

        let mut day = start;
        while day <= today {
            let key = day.format("%Y-%m-%d").to_string();
            let saved = self.process_day(day, &mut details.errors).await;
            info!(date = %key, saved, "Day complete");
            details.dates_processed.push(key.clone());
            details.articles_per_date.insert(key, saved);

            let Some(next) = day.succ_opt() else { break };
            day = next;
            if day <= today && self.config.day_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.day_delay_ms)).await;
            }
        }

        let report = RunReport::finish(details);
        info!(
            saved = report.new_articles_count,
            errors = report.details.errors.len(),
            "Ingestion finished"
        );
        Ok(report)
    }

    async fn process_day(&self, day: NaiveDate, errors: &mut Vec<RunError>) -> usize {
        let articles = self.news.fetch_day(day).await;
        info!(date = %day, fetched = articles.len(), "Fetched day listing");

        let mut saved = 0;
        for (i, raw) in articles.iter().enumerate() {
            match self.process_article(raw).await {
                Ok(()) => saved += 1,
                Err(reason) => {
                    let url = raw.url.clone().unwrap_or_default();
                    warn!(date = %day, %url, %reason, "Article skipped");
                    errors.push(RunError {
                        date: day.format("%Y-%m-%d").to_string(),
                        url,
                        reason: reason.to_string(),
                    });
                }
            }
            if i + 1 < articles.len() && self.config.article_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.article_delay_ms)).await;
            }
        }
        saved
    }

    /// Scrape, enrich and store one article.
    #[instrument(level = "info", skip_all, fields(url = raw.url.as_deref().unwrap_or("")))]
    pub async fn process_article(&self, raw: &RawArticle) -> std::result::Result<(), SkipReason> {
        let url = valid_url(raw)?;

        let scraped = self.scraper.scrape(&url).await;
        let (content, tag) = choose_content(raw, scraped).ok_or(SkipReason::NoContent)?;
        info!(source = %tag, chars = content.chars().count(), "Content selected");

        let enrichment = self.enricher.enrich(&content).await?;
        let record = ArticleRecord::assemble(raw, &url, content, tag, enrichment);

        self.store
            .upsert(&record)
            .await
            .map_err(|e| SkipReason::Store(e.to_string()))?;
        info!(category = %record.category, "Article stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NewsApiConfig, ScraperConfig};
    use crate::models::{ArticleSource, Category};
    use crate::scrapers::Strategy;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Always answers with a valid enrichment.
    #[derive(Debug)]
    struct CannedModel;

    impl AskAsync for CannedModel {
        type Response = Completion;

        async fn ask(&self, _text: &str) -> Result<Completion> {
            Ok(Completion {
                content: Some(
                    json!({
                        "title": "Generated headline",
                        "timeline": [{"year": "2001", "title": "Start", "summary": "It began."}],
                        "glossary": [{"term": "Bill", "definition": "A proposed law."}],
                        "category": "Politics",
                        "summary_bullets": ["Why it matters: laws change."]
                    })
                    .to_string(),
                ),
                finish_reason: Some("stop".into()),
                refusal: None,
            })
        }
    }

    /// Always fails like a provider outage.
    #[derive(Debug)]
    struct DownModel;

    impl AskAsync for DownModel {
        type Response = Completion;

        async fn ask(&self, _text: &str) -> Result<Completion> {
            Err(EnrichError::Provider("HTTP 503".into()).into())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 20).unwrap()
    }

    async fn pipeline_with<A>(server: &MockServer, model: A, lookback_days: i64) -> (tempfile::TempDir, Pipeline<A>)
    where
        A: AskAsync<Response = Completion>,
    {
        let dir = tempfile::tempdir().unwrap();
        let store = ArticleStore::open(&dir.path().join("news.db")).await.unwrap();
        let news = NewsApiClient::new(
            &NewsApiConfig {
                base_url: server.uri(),
                ..NewsApiConfig::default()
            },
            "news-key",
        )
        .unwrap();
        let scraper = Scraper::new(&ScraperConfig {
            timeout_secs: 2,
            retry_backoff_ms: 5,
            ..ScraperConfig::default()
        })
        .unwrap();
        let config = PipelineConfig {
            lookback_days,
            article_delay_ms: 0,
            day_delay_ms: 0,
        };
        let pipeline = Pipeline::new(news, scraper, Enricher::new(model, 15_000), store, &config);
        (dir, pipeline)
    }

    fn listing(server: &MockServer) -> serde_json::Value {
        json!({
            "status": "ok",
            "totalResults": 3,
            "articles": [
                {
                    "source": {"id": null, "name": "Gone Daily"},
                    "title": "Unreachable story",
                    "url": "http://127.0.0.1:1/unreachable",
                    "publishedAt": "2025-07-20T06:00:00Z",
                    "description": null,
                    "content": null
                },
                {
                    "source": {"id": null, "name": "Thin Times"},
                    "title": "Paywalled story",
                    "url": format!("{}/thin", server.uri()),
                    "publishedAt": "2025-07-20T07:00:00Z",
                    "description": "Lawmakers outlined a plan to cut transit fares.",
                    "content": null
                },
                {
                    "source": {"id": null, "name": "Full Post"},
                    "title": "Full story",
                    "url": format!("{}/full", server.uri()),
                    "publishedAt": "2025-07-20T08:00:00Z",
                    "description": "Short.",
                    "content": "Snippet text… [+1200 chars]"
                }
            ]
        })
    }

    async fn mount_pages(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/thin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><p>Subscribe to keep reading.</p></body></html>",
            ))
            .mount(server)
            .await;
        let body = "The city council approved the transit budget after a long session. ".repeat(6);
        Mock::given(method("GET"))
            .and(path("/full"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><body><article><p>{body}</p></article></body></html>"
            )))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn day_with_mixed_articles_stores_two_and_records_one_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/everything"))
            .and(query_param("from", "2025-07-20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(&server)))
            .expect(1)
            .mount(&server)
            .await;
        mount_pages(&server).await;

        let (_dir, pipeline) = pipeline_with(&server, CannedModel, 0).await;
        let report = pipeline.run_until(today()).await.unwrap();

        assert!(report.success);
        assert_eq!(report.new_articles_count, 2);
        assert_eq!(report.details.dates_processed, vec!["2025-07-20"]);
        assert_eq!(report.details.articles_per_date["2025-07-20"], 2);
        assert_eq!(report.details.errors.len(), 1);
        assert_eq!(report.details.errors[0].url, "http://127.0.0.1:1/unreachable");
        assert_eq!(report.details.errors[0].date, "2025-07-20");

        let store = pipeline.store();
        assert_eq!(store.count().await.unwrap(), 2);

        let thin = store.get(&format!("{}/thin", server.uri())).await.unwrap().unwrap();
        assert_eq!(thin.content_source_tag, "api-description");
        assert_eq!(thin.content, "Lawmakers outlined a plan to cut transit fares.");
        assert_eq!(thin.category, Category::Politics);

        let full = store.get(&format!("{}/full", server.uri())).await.unwrap().unwrap();
        assert_eq!(
            full.content_source_tag,
            format!("scraped:{}", Strategy::StructuredArticle)
        );
        assert_eq!(full.generated_title, "Generated headline");
        assert_eq!(full.original_title.as_deref(), Some("Full story"));
    }

    #[tokio::test]
    async fn store_write_failure_is_recorded_and_run_continues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/everything"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(&server)))
            .mount(&server)
            .await;
        mount_pages(&server).await;

        let (_dir, pipeline) = pipeline_with(&server, CannedModel, 0).await;
        pipeline
            .store()
            .connection()
            .execute(
                "CREATE TRIGGER reject_thin BEFORE INSERT ON articles \
                 WHEN NEW.url LIKE '%/thin' \
                 BEGIN SELECT RAISE(ABORT, 'write rejected'); END",
                (),
            )
            .await
            .unwrap();

        let report = pipeline.run_until(today()).await.unwrap();

        assert!(report.success);
        assert_eq!(report.new_articles_count, 1);
        assert_eq!(report.details.articles_per_date["2025-07-20"], 1);
        assert_eq!(report.details.errors.len(), 2);
        let thin_url = format!("{}/thin", server.uri());
        let thin_error = report
            .details
            .errors
            .iter()
            .find(|e| e.url == thin_url)
            .unwrap();
        assert!(thin_error.reason.starts_with("store write failed"));

        let store = pipeline.store();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get(&thin_url).await.unwrap().is_none());
        assert!(store.get(&format!("{}/full", server.uri())).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rerun_when_caught_up_processes_no_days() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/everything"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(&server)))
            .expect(1)
            .mount(&server)
            .await;
        mount_pages(&server).await;

        let (_dir, pipeline) = pipeline_with(&server, CannedModel, 0).await;
        let first = pipeline.run_until(today()).await.unwrap();
        assert_eq!(first.new_articles_count, 2);

        let second = pipeline.run_until(today()).await.unwrap();
        assert!(!second.success);
        assert!(second.details.dates_processed.is_empty());
        assert_eq!(second.new_articles_count, 0);
    }

    #[tokio::test]
    async fn empty_store_starts_at_lookback_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/everything"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok", "totalResults": 0, "articles": []
            })))
            .expect(3)
            .mount(&server)
            .await;

        let (_dir, pipeline) = pipeline_with(&server, CannedModel, 2).await;
        assert_eq!(
            pipeline.start_date(today()).await.unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 18).unwrap()
        );

        let report = pipeline.run_until(today()).await.unwrap();
        assert_eq!(
            report.details.dates_processed,
            vec!["2025-07-18", "2025-07-19", "2025-07-20"]
        );
        assert!(!report.success);
        assert!(report.details.errors.is_empty());
    }

    #[tokio::test]
    async fn oversized_lookback_is_a_config_error() {
        let server = MockServer::start().await;
        let (_dir, pipeline) = pipeline_with(&server, CannedModel, 100_000_000).await;

        let err = pipeline.start_date(today()).await.unwrap_err();
        assert!(matches!(err, NewsError::Config { .. }));
        assert!(pipeline.run_until(today()).await.is_err());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn enrichment_failure_skips_without_writing() {
        let server = MockServer::start().await;
        mount_pages(&server).await;

        let (_dir, pipeline) = pipeline_with(&server, DownModel, 0).await;
        let raw = RawArticle {
            url: Some(format!("{}/full", server.uri())),
            published_at: Some("2025-07-20T08:00:00Z".into()),
            source: ArticleSource::default(),
            ..Default::default()
        };

        let err = pipeline.process_article(&raw).await.unwrap_err();
        assert_eq!(
            err,
            SkipReason::Enrichment(EnrichError::Provider("HTTP 503".into()))
        );
        assert_eq!(pipeline.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected_before_any_request() {
        let server = MockServer::start().await;
        let (_dir, pipeline) = pipeline_with(&server, CannedModel, 0).await;

        for url in [None, Some("not a url"), Some("ftp://example.com/file")] {
            let raw = RawArticle {
                url: url.map(String::from),
                description: Some("Has a description.".into()),
                ..Default::default()
            };
            let err = pipeline.process_article(&raw).await.unwrap_err();
            assert!(matches!(err, SkipReason::InvalidUrl(_)));
        }
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn content_falls_back_to_cleaned_snippet_then_description() {
        let raw = RawArticle {
            content: Some("Stocks rose… [+2101 chars]".into()),
            description: Some("Markets up.".into()),
            ..Default::default()
        };
        assert_eq!(
            choose_content(&raw, ScrapeOutcome::default()),
            Some(("Stocks rose...".into(), "api-content-snippet".into()))
        );

        let raw = RawArticle {
            content: Some("   ".into()),
            description: Some(" Markets up. ".into()),
            ..Default::default()
        };
        assert_eq!(
            choose_content(&raw, ScrapeOutcome::default()),
            Some(("Markets up.".into(), "api-description".into()))
        );

        assert_eq!(choose_content(&RawArticle::default(), ScrapeOutcome::default()), None);
    }

    #[test]
    fn report_serializes_expected_shape() {
        let mut details = RunDetails::default();
        details.dates_processed.push("2025-07-20".into());
        details.articles_per_date.insert("2025-07-20".into(), 1);
        details.errors.push(RunError {
            date: "2025-07-20".into(),
            url: "https://ex.com/x".into(),
            reason: "no usable content".into(),
        });
        let value = serde_json::to_value(RunReport::finish(details)).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["new_articles_count"], json!(1));
        assert_eq!(value["details"]["articles_per_date"]["2025-07-20"], json!(1));
        assert_eq!(value["details"]["errors"][0]["url"], json!("https://ex.com/x"));
    }
}
