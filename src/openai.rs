//! Minimal OpenAI client for lesson plans and answer feedback.
//!
//! We only call chat.completions and ask for plain markdown text.
//! Calls are instrumented and log model names, latencies and token usage (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
  #[error("rate limited: {0}")]
  RateLimited(String),
  #[error("{0}")]
  Http(String),
  #[error("malformed response: {0}")]
  Decode(String),
}

/// Something that turns a prompt into model text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
  async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model =
      std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .pool_max_idle_per_host(20)
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model, temperature: 0.7 })
  }

  /// Plain-text chat completion with a single user message.
  #[instrument(level = "info", skip(self, user), fields(model = %self.model, prompt_len = user.len()))]
  async fn chat_plain(&self, user: &str) -> Result<String, CompletionError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![ChatMessageReq { role: "user".into(), content: user.into() }],
      temperature: self.temperature,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "arcade-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| CompletionError::Http(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(classify_failure(status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| CompletionError::Decode(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(elapsed = ?start.elapsed(), prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();

    Ok(text)
  }
}

#[async_trait]
impl CompletionProvider for OpenAI {
  async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
    self.chat_plain(prompt).await
  }
}

fn classify_failure(status: StatusCode, msg: String) -> CompletionError {
  if status == StatusCode::TOO_MANY_REQUESTS || msg.to_lowercase().contains("rate_limit") {
    CompletionError::RateLimited(msg)
  } else {
    CompletionError::Http(format!("OpenAI HTTP {}: {}", status, msg))
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
