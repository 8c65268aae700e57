//! LLM enrichment with structured output and exponential backoff retry.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait for one model round trip
//! - [`OpenAiClient`]: OpenAI-compatible chat completions with a strict JSON schema
//! - [`RetryAsk`]: decorator adding retry with backoff to any [`AskAsync`]
//! - [`Enricher`]: builds the prompt, sends it and validates the reply into an
//!   [`Enrichment`]
//!
//! # Retry Strategy
//!
//! Only provider failures (transport errors, non-2xx statuses) are retried.
//! A reply that arrives but fails validation is final for that article.
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), 30s) + random_jitter(0..250ms)
//! ```

use std::fmt;
use std::time::{Duration as StdDuration, Instant};

use itertools::Itertools;
use rand::{Rng, rng};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LlmConfig;
use crate::error::{EnrichError, NewsError, Result};
use crate::models::{Category, Enrichment, GlossaryEntry, TimelineEntry};
use crate::utils::{looks_truncated, truncate_chars, truncate_for_log};

const PROMPT_TEMPLATE: &str = r#"Given a news article, perform the following tasks.

Here's the news article:
{article}

Output

1) Title: Provide a concise, informative headline for the article.

2) Historical Context Timeline: Create a chronological timeline, strictly ascending years, of the key historical events that directly contribute to understanding the current news article. For each entry give the year or period, a brief descriptive headline, and a single paragraph of 3-4 sentences explaining what happened, who the key players were and why it occurred, ending with 1-2 sentences that connect the event to the current article.

3) Glossary of Terms: Define any complex terms or jargon using extremely simple language.

4) Category Assignment: Assign exactly one category from: {categories}.

5) Scan-friendly Summary Bullets: Summarize the article into at most 5 bullets, one sentence and at most 18 words each. The final bullet starts with "Why it matters:" and states the significance.
"#;

/// Trait for async LLM interaction.
///
/// Implementors send text to a model and return its reply. Decorators such as
/// [`RetryAsk`] wrap another implementor.
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self
                        .base_delay
                        .saturating_mul(1u32 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// The parts of a chat completion that decide whether it is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub refusal: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    response_format: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// JSON schema the model's reply must follow.
pub fn response_schema() -> serde_json::Value {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["title", "timeline", "glossary", "category", "summary_bullets"],
        "properties": {
            "title": { "type": "string" },
            "timeline": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["year", "title", "summary"],
                    "properties": {
                        "year": { "type": "string" },
                        "title": { "type": "string" },
                        "summary": { "type": "string" }
                    }
                }
            },
            "glossary": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["term", "definition"],
                    "properties": {
                        "term": { "type": "string" },
                        "definition": { "type": "string" }
                    }
                }
            },
            "category": { "type": "string", "enum": categories },
            "summary_bullets": { "type": "array", "items": { "type": "string" } }
        }
    })
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
    api_key: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl AskAsync for OpenAiClient {
    type Response = Completion;

    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: text,
            }],
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "article_enrichment",
                    "strict": true,
                    "schema": response_schema(),
                }
            }),
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        let dt = t0.elapsed();

        if !status.is_success() {
            warn!(elapsed_ms = dt.as_millis(), %status, body = %truncate_for_log(&body, 300), "API call failed");
            return Err(EnrichError::Provider(format!("HTTP {status}")).into());
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            EnrichError::Provider(format!("unreadable completion envelope: {e}"))
        })?;
        debug!(elapsed_ms = dt.as_millis(), choices = parsed.choices.len(), "API call returned");

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| Completion {
                content: c.message.content,
                finish_reason: c.finish_reason,
                refusal: c.message.refusal,
            })
            .unwrap_or_default())
    }
}

/// Shape of the model reply before validation.
#[derive(Debug, Deserialize)]
struct RawEnrichment {
    title: String,
    timeline: Vec<TimelineEntry>,
    glossary: Vec<GlossaryEntry>,
    category: String,
    summary_bullets: Vec<String>,
}

/// Validate a completion into an [`Enrichment`].
///
/// Succeeds only with finish reason `stop` (or none reported), no refusal and
/// a body that parses into the full schema with a non-empty title.
pub fn validate_completion(completion: Completion) -> std::result::Result<Enrichment, EnrichError> {
    if let Some(refusal) = completion.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(EnrichError::Refusal(refusal));
    }
    if let Some(reason) = completion.finish_reason.filter(|r| r != "stop") {
        return Err(EnrichError::FinishReason(reason));
    }
    let content = completion
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(EnrichError::EmptyResponse)?;

    let raw: RawEnrichment = serde_json::from_str(&content).map_err(|e| {
        if looks_truncated(&e) {
            warn!(error = %e, "Structured response appears truncated");
        }
        EnrichError::Schema(e.to_string())
    })?;

    let title = raw.title.trim().to_string();
    if title.is_empty() {
        return Err(EnrichError::Schema("title is empty".into()));
    }

    let category = match Category::from_label(&raw.category) {
        Some(c) => c,
        None => {
            warn!(category = %raw.category, "Category outside the fixed set; using Other");
            Category::Other
        }
    };

    let glossary = raw
        .glossary
        .into_iter()
        .filter(|g| !g.term.trim().is_empty())
        .unique_by(|g| g.term.trim().to_lowercase())
        .collect();

    let summary_bullets = raw
        .summary_bullets
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .take(5)
        .collect();

    Ok(Enrichment {
        title,
        timeline: raw.timeline,
        glossary,
        category,
        summary_bullets,
    })
}

/// Sends article text through an [`AskAsync`] client and validates the reply.
pub struct Enricher<A> {
    client: A,
    max_input_chars: usize,
}

impl<A> fmt::Debug for Enricher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enricher")
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

impl Enricher<RetryAsk<OpenAiClient>> {
    /// OpenAI-compatible enricher with the configured retry policy.
    pub fn openai(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = OpenAiClient::new(config, api_key)?;
        let retry = RetryAsk::new(
            client,
            config.max_retries,
            StdDuration::from_millis(config.retry_base_delay_ms),
        );
        Ok(Self::new(retry, config.max_input_chars))
    }
}

impl<A> Enricher<A>
where
    A: AskAsync<Response = Completion>,
{
    pub fn new(client: A, max_input_chars: usize) -> Self {
        Self {
            client,
            max_input_chars,
        }
    }

    /// Article text cut to the input limit, prefix kept.
    pub fn prepare_input<'t>(&self, text: &'t str) -> &'t str {
        truncate_chars(text, self.max_input_chars)
    }

    pub fn render_prompt(&self, text: &str) -> String {
        let categories = Category::ALL.iter().map(|c| c.label()).join(", ");
        PROMPT_TEMPLATE
            .replace("{categories}", &categories)
            .replacen("{article}", self.prepare_input(text), 1)
    }

    /// Enrich one article. Never returns a partial result.
    #[instrument(level = "info", skip_all, fields(input_chars = text.chars().count()))]
    pub async fn enrich(&self, text: &str) -> std::result::Result<Enrichment, EnrichError> {
        let t0 = Instant::now();
        let prompt = self.render_prompt(text);

        let completion = self.client.ask(&prompt).await.map_err(|e| match e {
            NewsError::Enrichment(inner) => inner,
            other => EnrichError::Provider(other.to_string()),
        })?;

        let result = validate_completion(completion);
        match &result {
            Ok(e) => info!(
                elapsed_ms = t0.elapsed().as_millis(),
                category = %e.category,
                timeline = e.timeline.len(),
                glossary = e.glossary.len(),
                "Enrichment succeeded"
            ),
            Err(e) => warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "Enrichment rejected"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Canned replies, recording every prompt it receives.
    #[derive(Debug, Default)]
    struct FakeModel {
        replies: Mutex<Vec<Result<Completion>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeModel {
        fn replying(replies: Vec<Result<Completion>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::default(),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl AskAsync for FakeModel {
        type Response = Completion;

        async fn ask(&self, text: &str) -> Result<Completion> {
            self.prompts.lock().unwrap().push(text.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(EnrichError::Provider("no reply queued".into()).into()))
        }
    }

    impl AskAsync for &FakeModel {
        type Response = Completion;

        async fn ask(&self, text: &str) -> Result<Completion> {
            <FakeModel as AskAsync>::ask(*self, text).await
        }
    }

    fn reply_json(category: &str) -> String {
        json!({
            "title": "  Council passes budget  ",
            "timeline": [
                {"year": "2019", "title": "Deficit grows", "summary": "Spending rose."},
                {"year": "2023", "title": "Reform bill", "summary": "A bill was tabled."}
            ],
            "glossary": [
                {"term": "Deficit", "definition": "Spending more than you earn."},
                {"term": "deficit ", "definition": "Duplicate."},
                {"term": "Appropriation", "definition": "Money set aside."}
            ],
            "category": category,
            "summary_bullets": ["The council passed it.", " ", "Why it matters: taxes change."]
        })
        .to_string()
    }

    fn stop(content: String) -> Completion {
        Completion {
            content: Some(content),
            finish_reason: Some("stop".into()),
            refusal: None,
        }
    }

    #[tokio::test]
    async fn valid_reply_is_normalized() {
        let model = FakeModel::replying(vec![Ok(stop(reply_json("Politics")))]);
        let enricher = Enricher::new(&model, 15_000);

        let e = enricher.enrich("The council met today.").await.unwrap();
        assert_eq!(e.title, "Council passes budget");
        assert_eq!(e.category, Category::Politics);
        assert_eq!(e.timeline.len(), 2);
        assert_eq!(
            e.glossary.iter().map(|g| g.term.as_str()).collect::<Vec<_>>(),
            vec!["Deficit", "Appropriation"]
        );
        assert_eq!(e.summary_bullets.len(), 2);

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("The council met today."));
        assert!(prompt.contains("World News, US News, Other"));
    }

    #[tokio::test]
    async fn unknown_category_maps_to_other() {
        let model = FakeModel::replying(vec![Ok(stop(reply_json("Cryptocurrency")))]);
        let e = Enricher::new(&model, 15_000).enrich("text").await.unwrap();
        assert_eq!(e.category, Category::Other);

        let model = FakeModel::replying(vec![Ok(stop(reply_json("us news")))]);
        let e = Enricher::new(&model, 15_000).enrich("text").await.unwrap();
        assert_eq!(e.category, Category::UsNews);
    }

    #[tokio::test]
    async fn long_input_is_truncated_to_limit() {
        let model = FakeModel::replying(vec![Ok(stop(reply_json("Science")))]);
        let enricher = Enricher::new(&model, 15_000);
        let article = format!("{}{}", "a".repeat(15_000), "\u{2603}".repeat(500));

        assert_eq!(enricher.prepare_input(&article).chars().count(), 15_000);
        enricher.enrich(&article).await.unwrap();

        let prompt = &model.prompts()[0];
        assert!(prompt.contains(&"a".repeat(15_000)));
        assert!(!prompt.contains('\u{2603}'));
    }

    #[tokio::test]
    async fn non_stop_finish_reason_is_a_failure() {
        let mut completion = stop(reply_json("Politics"));
        completion.finish_reason = Some("length".into());
        let model = FakeModel::replying(vec![Ok(completion)]);

        let err = Enricher::new(&model, 100).enrich("text").await.unwrap_err();
        assert_eq!(err, EnrichError::FinishReason("length".into()));
    }

    #[tokio::test]
    async fn refusal_and_empty_replies_fail() {
        let model = FakeModel::replying(vec![
            Ok(Completion {
                refusal: Some("I can't help with that.".into()),
                ..Default::default()
            }),
            Ok(Completion::default()),
        ]);
        let enricher = Enricher::new(&model, 100);

        assert!(matches!(enricher.enrich("a").await, Err(EnrichError::Refusal(_))));
        assert_eq!(enricher.enrich("b").await, Err(EnrichError::EmptyResponse));
    }

    #[tokio::test]
    async fn schema_violations_fail_whole_article() {
        let missing_bullets = json!({
            "title": "T", "timeline": [], "glossary": [], "category": "Health"
        })
        .to_string();
        let blank_title = json!({
            "title": " ", "timeline": [], "glossary": [], "category": "Health", "summary_bullets": []
        })
        .to_string();
        let model = FakeModel::replying(vec![
            Ok(stop(r#"{"title": "cut off"#.into())),
            Ok(stop(missing_bullets)),
            Ok(stop(blank_title)),
        ]);
        let enricher = Enricher::new(&model, 100);

        for _ in 0..3 {
            assert!(matches!(enricher.enrich("x").await, Err(EnrichError::Schema(_))));
        }
    }

    #[tokio::test]
    async fn provider_error_surfaces_as_provider() {
        let model = FakeModel::replying(vec![Err(NewsError::config("boom"))]);
        let err = Enricher::new(&model, 100).enrich("x").await.unwrap_err();
        assert!(matches!(err, EnrichError::Provider(_)));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let model = FakeModel::replying(vec![
            Err(EnrichError::Provider("HTTP 503".into()).into()),
            Ok(stop(reply_json("Sports"))),
        ]);
        let retry = RetryAsk::new(&model, 2, StdDuration::from_millis(1));
        let e = Enricher::new(retry, 100).enrich("x").await.unwrap();
        assert_eq!(e.category, Category::Sports);
        assert_eq!(model.prompts().len(), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let model = FakeModel::replying(vec![
            Err(EnrichError::Provider("HTTP 500".into()).into()),
            Err(EnrichError::Provider("HTTP 500".into()).into()),
        ]);
        let retry = RetryAsk::new(&model, 1, StdDuration::from_millis(1));
        let err = Enricher::new(retry, 100).enrich("x").await.unwrap_err();
        assert_eq!(err, EnrichError::Provider("HTTP 500".into()));
        assert_eq!(model.prompts().len(), 2);
    }

    #[tokio::test]
    async fn openai_client_sends_strict_schema_request() {
        let server = MockServer::start().await;
        let completion = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": reply_json("Technology"), "refusal": null},
                "finish_reason": "stop"
            }]
        });
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "response_format": {"type": "json_schema", "json_schema": {"strict": true}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion))
            .expect(1)
            .mount(&server)
            .await;

        let config = LlmConfig {
            base_url: format!("{}/v1", server.uri()),
            max_retries: 0,
            ..LlmConfig::default()
        };
        let enricher = Enricher::openai(&config, "sk-test").unwrap();
        let e = enricher.enrich("Chipmaker unveils new processor.").await.unwrap();
        assert_eq!(e.category, Category::Technology);
    }

    #[tokio::test]
    async fn openai_client_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"content": reply_json("Health")},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = LlmConfig {
            base_url: server.uri(),
            max_retries: 1,
            retry_base_delay_ms: 1,
            ..LlmConfig::default()
        };
        let e = Enricher::openai(&config, "k").unwrap().enrich("x").await.unwrap();
        assert_eq!(e.category, Category::Health);
    }
}
