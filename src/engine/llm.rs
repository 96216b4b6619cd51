//! Language-model client for classification
//!
//! The model service is an untrusted, possibly-slow, possibly-unavailable
//! collaborator behind the `ModelClient` trait. The shipped implementation
//! speaks the OpenAI-compatible chat-completions protocol (OpenRouter and
//! compatible providers) and parses the fixed line-format answer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::ApiConfig;
use crate::prompt::ClassifyRequest;

/// Failures from a model call. Only transport-class failures are retried;
/// an unparseable answer would fail identically on retry and just burn
/// quota.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("unparseable answer: {0}")]
    Answer(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transport(_) | ModelError::RateLimited(_))
    }
}

/// The model's raw answer: a feature identifier (not yet checked against
/// the candidate list), a confidence in [0, 1], and a short justification.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnswer {
    pub feature: String,
    pub confidence: f64,
    pub reason: String,
}

/// External language-model service seam
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ModelAnswer, ModelError>;
}

/// OpenAI-compatible chat-completions client
pub struct HttpModelClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl HttpModelClient {
    pub fn new(config: &ApiConfig, api_key: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ModelAnswer, ModelError> {
        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: ClassifyRequest::system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_message(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.1,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/buglink")
            .header("X-Title", "buglink")
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 {
                ModelError::RateLimited(body)
            } else if status.is_server_error() {
                ModelError::Transport(format!("{status}: {body}"))
            } else {
                ModelError::Api(format!("{status}: {body}"))
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Api(format!("bad response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Answer("empty completion".to_string()))?;

        parse_answer(&content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Parse the fixed line-format answer:
///
/// ```text
/// feature: FEAT-12
/// confidence: 0.85
/// reason: Same crash signature as the login rework.
/// ```
///
/// Prefix matching is case-insensitive and tolerates leading list markers.
pub fn parse_answer(text: &str) -> Result<ModelAnswer, ModelError> {
    let mut feature: Option<String> = None;
    let mut confidence: Option<f64> = None;
    let mut reason = String::new();

    fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
        let head = line.get(..prefix.len())?;
        if head.eq_ignore_ascii_case(prefix) {
            line.get(prefix.len()..)
        } else {
            None
        }
    }

    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*', ' ']);
        if let Some(rest) = strip_prefix_ci(line, "feature:") {
            let value = rest.trim();
            if !value.is_empty() {
                feature = Some(value.to_string());
            }
        } else if let Some(rest) = strip_prefix_ci(line, "confidence:") {
            let value = rest.trim();
            match value.parse::<f64>() {
                Ok(v) => confidence = Some(v.clamp(0.0, 1.0)),
                Err(_) => {
                    warn!("Non-numeric confidence in model answer: {value:?}");
                }
            }
        } else if let Some(rest) = strip_prefix_ci(line, "reason:") {
            reason = rest.trim().to_string();
        }
    }

    match (feature, confidence) {
        (Some(feature), Some(confidence)) => Ok(ModelAnswer {
            feature,
            confidence,
            reason,
        }),
        _ => Err(ModelError::Answer(format!(
            "missing feature or confidence line in: {:?}",
            text.chars().take(200).collect::<String>()
        ))),
    }
}
