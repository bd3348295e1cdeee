//! Analysis service abstraction and implementations.
//!
//! Defines the [`AnalysisService`] trait and concrete implementations:
//! - **[`DisabledService`]**: always errors; used when analysis is not configured.
//! - **[`OpenAiService`]**: OpenAI chat completions in JSON mode.
//! - **[`OllamaService`]**: a local Ollama instance's `/api/chat` endpoint.
//! - **[`HttpService`]**: POSTs the serialized [`AnalysisRequest`] to a URL
//!   and returns the response body verbatim.
//!
//! Every service makes exactly one request per call and returns the raw
//! response text; parsing happens in the runner so that a malformed
//! response can be kept for diagnosis.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use forum_harness::config::AnalysisConfig;
//! # use forum_harness::analyzer::create_service;
//! let config = AnalysisConfig::default(); // provider = "disabled"
//! let service = create_service(&config).unwrap();
//! assert_eq!(service.model_name(), "disabled");
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use forum_harness_core::analysis::AnalysisRequest;

use crate::config::AnalysisConfig;

/// The external structured-analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Model identifier recorded alongside every result.
    fn model_name(&self) -> &str;

    /// Send one request and return the response body text.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String>;
}

const SYSTEM_PROMPT: &str = r#"You classify support-forum threads and extract the questions they contain.

Respond with a single JSON object:
{"category": "<question|bug_report|feature_request|how_to|discussion|announcement|feedback|other>",
 "records": [{"question": "...", "answer": "... or null", "tags": ["..."]}]}

List records in the order the questions appear in the thread."#;

// ============ Disabled ============

/// A no-op service that always returns errors.
pub struct DisabledService;

#[async_trait]
impl AnalysisService for DisabledService {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<String> {
        bail!("Analysis provider is disabled")
    }
}

// ============ OpenAI ============

/// Chat completions against the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiService {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiService {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("analysis.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());

        Ok(Self {
            client: build_client(config)?,
            api_key,
            model,
            url,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnalysisService for OpenAiService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.render_text() },
            ],
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

// ============ Ollama ============

/// Chat against a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaService {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: f32,
}

impl OllamaService {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("analysis.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: build_client(config)?,
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnalysisService for OllamaService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "options": { "temperature": self.temperature },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.render_text() },
            ],
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }
}

// ============ Generic HTTP ============

/// POSTs the request as JSON and returns the body as-is.
///
/// The body may be a bare JSON object or free text containing a fenced
/// JSON block; both are accepted by the parser.
pub struct HttpService {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpService {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("analysis.url required for http provider"))?;
        Ok(Self {
            client: build_client(config)?,
            url,
            model: config.model.clone().unwrap_or_else(|| "http".to_string()),
        })
    }
}

#[async_trait]
impl AnalysisService for HttpService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        let body_text = response.text().await?;
        if !status.is_success() {
            bail!("analysis API error {}: {}", status, body_text);
        }
        Ok(body_text)
    }
}

fn build_client(config: &AnalysisConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Create the [`AnalysisService`] named by `analysis.provider`.
///
/// | Config Value | Service |
/// |-------------|---------|
/// | `"disabled"` | [`DisabledService`] |
/// | `"openai"` | [`OpenAiService`] |
/// | `"ollama"` | [`OllamaService`] |
/// | `"http"` | [`HttpService`] |
pub fn create_service(config: &AnalysisConfig) -> Result<Arc<dyn AnalysisService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledService)),
        "openai" => Ok(Arc::new(OpenAiService::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaService::new(config)?)),
        "http" => Ok(Arc::new(HttpService::new(config)?)),
        other => bail!("Unknown analysis provider: {}", other),
    }
}
