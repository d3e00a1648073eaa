// src/oracle.rs
//! Text oracle: the only non-deterministic dependency in the pipeline,
//! modeled as a narrow two-method trait so tests can script it. The OpenAI
//! client mirrors the chat-completions shape; any malformed structured
//! response is treated exactly like a transport failure upstream (retry /
//! fallback policy lives with the callers).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{EnrichError, EnrichResult};

/// Prompt pair sent to a provider.
#[derive(Debug, Clone)]
pub struct OraclePrompt {
    pub system: String,
    pub user: String,
}

/// Structured answer for classification escalation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleClassification {
    pub category: String,
    pub confidence: f32,
    pub rationale: String,
}

/// Structured answer for sentiment scoring. Raw wire shape; range checking
/// and clamping happen in the scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleScore {
    pub sentiment: f32,
    pub impact: i32,
    pub confidence: f32,
    pub stance: String,
    pub summary: String,
    pub rationale: String,
    pub key_factors: Vec<String>,
}

#[async_trait::async_trait]
pub trait TextOracle: Send + Sync {
    async fn classify(&self, prompt: &OraclePrompt) -> EnrichResult<OracleClassification>;
    async fn score(&self, prompt: &OraclePrompt) -> EnrichResult<OracleScore>;
    fn provider_name(&self) -> &'static str;
}

pub type DynOracle = Arc<dyn TextOracle>;

// ------------------------------------------------------------
// OpenAI provider
// ------------------------------------------------------------

/// OpenAI provider (Chat Completions API). Requires `OPENAI_API_KEY`.
pub struct OpenAiOracle {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiOracle {
    /// `model_override`: pass Some("gpt-4o-mini") to override; defaults to gpt-4o-mini.
    pub fn new(model_override: Option<&str>) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        Self::with_key(api_key, model_override)
    }

    pub fn with_key(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("equity-news-enricher/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        let model = model_override.unwrap_or("gpt-4o-mini").to_string();
        Self {
            http,
            api_key,
            model,
        }
    }

    /// One chat call; the assistant message is expected to be a JSON object.
    async fn fetch_json(&self, prompt: &OraclePrompt) -> EnrichResult<serde_json::Value> {
        if self.api_key.is_empty() {
            return Err(EnrichError::OracleTransient(
                "OPENAI_API_KEY not configured".into(),
            ));
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &prompt.system,
                },
                Msg {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.0,
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| EnrichError::OracleTransient(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            // 429 and 5xx are retryable; anything else is a hard schema-level
            // problem with the request we built.
            let msg = format!("openai status {status}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(EnrichError::OracleTransient(msg))
            } else {
                Err(EnrichError::OracleSchema(msg))
            };
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| EnrichError::OracleSchema(format!("bad completion envelope: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        serde_json::from_str(content)
            .map_err(|e| EnrichError::OracleSchema(format!("non-JSON completion: {e}")))
    }
}

#[async_trait::async_trait]
impl TextOracle for OpenAiOracle {
    async fn classify(&self, prompt: &OraclePrompt) -> EnrichResult<OracleClassification> {
        let v = self.fetch_json(prompt).await?;
        serde_json::from_value(v)
            .map_err(|e| EnrichError::OracleSchema(format!("classification payload: {e}")))
    }

    async fn score(&self, prompt: &OraclePrompt) -> EnrichResult<OracleScore> {
        let v = self.fetch_json(prompt).await?;
        serde_json::from_value(v)
            .map_err(|e| EnrichError::OracleSchema(format!("score payload: {e}")))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Concurrency gate
// ------------------------------------------------------------

/// Bounds concurrent oracle calls independently of the document worker pool;
/// the oracle is a rate-limited external resource.
pub struct GatedOracle {
    inner: DynOracle,
    permits: Semaphore,
}

impl GatedOracle {
    pub fn new(inner: DynOracle, max_in_flight: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(max_in_flight.max(1)),
        }
    }
}

#[async_trait::async_trait]
impl TextOracle for GatedOracle {
    async fn classify(&self, prompt: &OraclePrompt) -> EnrichResult<OracleClassification> {
        let _permit = self.permits.acquire().await.expect("gate never closed");
        self.inner.classify(prompt).await
    }

    async fn score(&self, prompt: &OraclePrompt) -> EnrichResult<OracleScore> {
        let _permit = self.permits.acquire().await.expect("gate never closed");
        self.inner.score(prompt).await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

// ------------------------------------------------------------
// Noop + scripted providers
// ------------------------------------------------------------

/// Always reports the oracle as unavailable. Used when no provider is
/// configured; the classifier keyword fallback keeps the pipeline alive.
pub struct NoopOracle;

#[async_trait::async_trait]
impl TextOracle for NoopOracle {
    async fn classify(&self, _prompt: &OraclePrompt) -> EnrichResult<OracleClassification> {
        Err(EnrichError::OracleTransient("oracle disabled".into()))
    }

    async fn score(&self, _prompt: &OraclePrompt) -> EnrichResult<OracleScore> {
        Err(EnrichError::OracleTransient("oracle disabled".into()))
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}

/// Scripted oracle for tests: queued answers are popped per call; when a
/// queue runs dry the oracle reports a transient failure. Call counters let
/// tests assert how often each method was hit.
#[derive(Default)]
pub struct MockOracle {
    classify_script: Mutex<VecDeque<EnrichResult<OracleClassification>>>,
    score_script: Mutex<VecDeque<EnrichResult<OracleScore>>>,
    pub classify_calls: AtomicUsize,
    pub score_calls: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_classify(&self, r: EnrichResult<OracleClassification>) {
        self.classify_script.lock().expect("script mutex").push_back(r);
    }

    pub fn push_score(&self, r: EnrichResult<OracleScore>) {
        self.score_script.lock().expect("script mutex").push_back(r);
    }
}

#[async_trait::async_trait]
impl TextOracle for MockOracle {
    async fn classify(&self, _prompt: &OraclePrompt) -> EnrichResult<OracleClassification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.classify_script
            .lock()
            .expect("script mutex")
            .pop_front()
            .unwrap_or_else(|| Err(EnrichError::OracleTransient("script exhausted".into())))
    }

    async fn score(&self, _prompt: &OraclePrompt) -> EnrichResult<OracleScore> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        self.score_script
            .lock()
            .expect("script mutex")
            .pop_front()
            .unwrap_or_else(|| Err(EnrichError::OracleTransient("script exhausted".into())))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
