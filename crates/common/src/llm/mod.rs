//! Language model access
//!
//! Provides:
//! - An OpenAI-compatible chat completions client
//! - Failure classification into transient / malformed / permanent
//! - JSON extraction from model output
//! - The reasoning capability used by the engine

pub mod prompts;
mod reasoner;

pub use reasoner::LlmReasoner;

use crate::config::LlmConfig;
use crate::errors::{AppError, CollaboratorError, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat completions client
#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
    endpoint: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let endpoint = format!("{}/chat/completions", config.api_base.trim_end_matches('/'));

        Ok(Self {
            config,
            client,
            endpoint,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One completion; `json_mode` asks the server for a JSON object
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> std::result::Result<String, CollaboratorError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::malformed(format!("invalid completion body: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::malformed("completion has no content"))?;

        debug!(model = %self.config.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}

fn classify_transport(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CollaboratorError::transient(format!("LLM request failed: {}", err))
    } else if err.is_decode() {
        CollaboratorError::malformed(format!("LLM response unreadable: {}", err))
    } else {
        CollaboratorError::permanent(format!("LLM request failed: {}", err))
    }
}

/// Rate limits, timeouts and server errors can pass; other client errors will not
pub(crate) fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let snippet: String = body.chars().take(300).collect();
    let message = format!("LLM API error {}: {}", status, snippet);

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        CollaboratorError::transient(message)
    } else {
        CollaboratorError::permanent(message)
    }
}

/// Remove a surrounding Markdown code fence, if any
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse model output as JSON of shape `T`
pub fn parse_json_response<T: DeserializeOwned>(
    raw: &str,
) -> std::result::Result<T, CollaboratorError> {
    let body = strip_code_fences(raw);
    serde_json::from_str(body).or_else(|first_err| {
        // Fall back to the outermost object when prose surrounds it
        match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end])
                .map_err(|e| CollaboratorError::malformed(format!("invalid JSON: {}", e))),
            _ => Err(CollaboratorError::malformed(format!(
                "invalid JSON: {}",
                first_err
            ))),
        }
    })
}
