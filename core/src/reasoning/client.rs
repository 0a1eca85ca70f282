use std::time::Duration;

use scanai_common::config::ReasoningConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("CLAUDE_API_KEY is not set")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response contained no text")]
    EmptyResponse,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Single-turn client for the messages API.
#[derive(Clone)]
pub struct ReasoningClient {
    http: reqwest::Client,
    config: ReasoningConfig,
}

impl ReasoningClient {
    pub fn new(config: ReasoningConfig) -> Result<Self, ReasoningError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("scanai/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Sends `prompt` as one user message and returns the first text block
    /// of the reply.
    pub async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ReasoningError::MissingApiKey)?;

        let body = MessageRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.config.model, "Sending request to reasoning service");
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: MessageResponse = response.json().await?;
        first_text(reply).ok_or(ReasoningError::EmptyResponse)
    }
}

fn first_text(reply: MessageResponse) -> Option<String> {
    reply
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .find_map(|block| block.text)
}
