//! Chat-completion backends spoken over plain HTTPS with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::costs::model_cost;
use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
use super::LlmBackend;
use crate::error::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct HttpProvider {
    client: reqwest::Client,
    backend: LlmBackend,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl HttpProvider {
    pub fn new(
        backend: LlmBackend,
        api_key: SecretString,
        model: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: backend.name().to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        let base_url = base_url
            .unwrap_or_else(|| backend.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            backend,
            api_key,
            model: model.into(),
            base_url,
        })
    }

    fn request_failed(&self, reason: impl Into<String>) -> LlmError {
        LlmError::RequestFailed {
            provider: self.backend.name().to_string(),
            reason: reason.into(),
        }
    }

    async fn post(&self, request: reqwest::RequestBuilder, body: &Value) -> Result<Value, LlmError> {
        let resp = request
            .json(body)
            .send()
            .await
            .map_err(|e| self.request_failed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: self.backend.name().to_string(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.request_failed(format!("HTTP {status}: {}", truncate(&text, 300))));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| LlmError::InvalidResponse {
                provider: self.backend.name().to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        model_cost(&self.model)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(
            provider = self.backend.name(),
            model = %self.model,
            messages = request.messages.len(),
            "LLM request"
        );
        match self.backend {
            LlmBackend::OpenAi => {
                let body = openai_body(&self.model, &request);
                let req = self
                    .client
                    .post(format!("{}/chat/completions", self.base_url))
                    .bearer_auth(self.api_key.expose_secret());
                let value = self.post(req, &body).await?;
                parse_openai(value)
            }
            LlmBackend::Anthropic => {
                let body = anthropic_body(&self.model, &request);
                let req = self
                    .client
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", self.api_key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION);
                let value = self.post(req, &body).await?;
                parse_anthropic(value)
            }
        }
    }
}

fn openai_body(model: &str, request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
    });
    if let Some(max) = request.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if request.json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

/// Anthropic takes the system prompt out of band and has no JSON mode, so
/// json requests get a trailing instruction instead.
fn anthropic_body(model: &str, request: &CompletionRequest) -> Value {
    let mut system: Vec<&str> = Vec::new();
    let mut messages: Vec<&ChatMessage> = Vec::new();
    for m in &request.messages {
        match m.role {
            Role::System => system.push(&m.content),
            _ => messages.push(m),
        }
    }
    let mut system = system.join("\n\n");
    if request.json_mode {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str("Respond with a single JSON object and nothing else.");
    }

    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    body
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_openai(value: Value) -> Result<CompletionResponse, LlmError> {
    let resp: OpenAiResponse =
        serde_json::from_value(value).map_err(|e| LlmError::InvalidResponse {
            provider: "openai".into(),
            reason: e.to_string(),
        })?;
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: "openai".into(),
            reason: "response has no choices".into(),
        })?;
    let usage = resp.usage.unwrap_or(OpenAiUsage {
        prompt_tokens: 0,
        completion_tokens: 0,
    });
    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        finish_reason: match choice.finish_reason.as_deref() {
            Some("stop") | None => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some(_) => FinishReason::Other,
        },
    })
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_anthropic(value: Value) -> Result<CompletionResponse, LlmError> {
    let resp: AnthropicResponse =
        serde_json::from_value(value).map_err(|e| LlmError::InvalidResponse {
            provider: "anthropic".into(),
            reason: e.to_string(),
        })?;
    let content = resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    Ok(CompletionResponse {
        content,
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
        finish_reason: match resp.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") | None => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some(_) => FinishReason::Other,
        },
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
