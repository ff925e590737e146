// src/services/reasoning.rs

//! Reasoning service client.
//!
//! The service is a plain `prompt -> text` oracle with no latency or
//! determinism guarantee. Callers must parse its output defensively.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ReasoningConfig;

/// Prompt-in, text-out semantic service.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// Ask the service, bounded by `timeout`.
pub async fn ask_with_timeout(
    service: &dyn ReasoningService,
    prompt: &str,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, service.ask(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout("reasoning service", timeout.as_secs())),
    }
}

/// Pull the first JSON object out of a free-form reply.
///
/// Tolerates markdown code fences and surrounding prose.
pub fn extract_json_object(reply: &str) -> Option<serde_json::Value> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok())
        .as_ref();

    let body = fence
        .and_then(|re| re.captures(reply))
        .and_then(|caps| caps.get(1))
        .map_or(reply, |m| m.as_str());

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&body[start..=end])
        .ok()
        .filter(serde_json::Value::is_object)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct HttpReasoningService {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl HttpReasoningService {
    /// Build a client; the bearer token is read from `config.api_key_env`.
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            log::debug!(
                "{} not set; calling {} without credentials",
                config.api_key_env,
                config.endpoint
            );
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream: false,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::reasoning(format!(
                "{} returned status {}",
                self.endpoint, status
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::reasoning("empty completion"))
    }
}
