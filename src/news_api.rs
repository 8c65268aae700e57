//! News listing API client.
//!
//! Fetches article metadata for a date window. Failures are soft: a transport
//! error or a non-ok status yields an empty list, which the pipeline treats as
//! a day with nothing to process.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::NewsApiConfig;
use crate::error::{NewsError, Result};
use crate::models::RawArticle;
use crate::utils::truncate_for_log;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    status: String,
    total_results: Option<u32>,
    #[serde(default)]
    articles: Vec<RawArticle>,
    code: Option<String>,
    message: Option<String>,
}

/// Client for a NewsAPI-compatible listing endpoint.
pub struct NewsApiClient {
    http: Client,
    config: NewsApiConfig,
    api_key: String,
}

impl std::fmt::Debug for NewsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiClient")
            .field("base_url", &self.config.base_url)
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}

impl NewsApiClient {
    pub fn new(config: &NewsApiConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            api_key: api_key.into(),
        })
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.endpoint
        )
    }

    fn query_params(&self, from: NaiveDate, to: NaiveDate) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", self.config.query.clone()),
            ("language", self.config.language.clone()),
            ("from", from.format("%Y-%m-%d").to_string()),
            ("to", to.format("%Y-%m-%d").to_string()),
            ("sortBy", self.config.sort_by.clone()),
            ("pageSize", self.config.page_size.to_string()),
        ];
        if !self.config.exclude_domains.is_empty() {
            params.push(("excludeDomains", self.config.exclude_domains.join(",")));
        }
        if let Some(country) = &self.config.country {
            params.push(("country", country.clone()));
        }
        params.push(("apiKey", self.api_key.clone()));
        params
    }

    /// Fetch articles published between `from` and `to` (inclusive).
    pub async fn try_fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<RawArticle>> {
        let url = self.endpoint_url();
        debug!(%url, %from, %to, "Requesting article listing");

        let response = self
            .http
            .get(&url)
            .query(&self.query_params(from, to))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: NewsApiResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) if !status.is_success() => {
                return Err(NewsError::NewsApi {
                    code: status.as_u16().to_string(),
                    message: format!("{e}; body: {}", truncate_for_log(&body, 200)),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if parsed.status != "ok" || !status.is_success() {
            return Err(NewsError::NewsApi {
                code: parsed.code.unwrap_or_else(|| status.as_u16().to_string()),
                message: parsed.message.unwrap_or_else(|| "unknown error".into()),
            });
        }

        debug!(total_results = ?parsed.total_results, returned = parsed.articles.len(), "Listing parsed");
        Ok(parsed.articles)
    }

    /// Fetch articles for the window, returning an empty list on any failure.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Vec<RawArticle> {
        match self.try_fetch(from, to).await {
            Ok(articles) => {
                info!(count = articles.len(), "Fetched article listing");
                articles
            }
            Err(e) => {
                warn!(error = %e, "News listing request failed; treating as zero articles");
                Vec::new()
            }
        }
    }

    /// Fetch a single day's articles.
    pub async fn fetch_day(&self, day: NaiveDate) -> Vec<RawArticle> {
        self.fetch(day, day).await
    }
}
