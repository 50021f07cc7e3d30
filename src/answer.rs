use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::assembler::AnswerRequest;
use crate::config::{LlmConfig, LlmProvider};
use crate::error::QueryError;

/// Turns an assembled request into a short answer.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, request: &AnswerRequest) -> Result<String, QueryError>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

/// Answers through an OpenAI-compatible or Anthropic chat endpoint.
pub struct LlmAnswerer {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmAnswerer {
    pub fn new(config: LlmConfig) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| QueryError::Answer(e.to_string()))?;
        Ok(Self { config, http })
    }

    async fn call_openai_compatible(&self, request: &AnswerRequest) -> Result<String, String> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: request.instructions.clone() },
                ChatMessage { role: "user".to_string(), content: request.prompt() },
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let chat_url = format!("{}/chat/completions", self.config.base_url().trim_end_matches('/'));
        let mut req = self.http.post(&chat_url).json(&body);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let resp = req.send().await.map_err(|e| format!("Request error: {}", e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("LLM HTTP error {}: {}", status, body));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| format!("Parse error: {}", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "No response from model".to_string())
    }

    async fn call_anthropic(&self, request: &AnswerRequest) -> Result<String, String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| "API key is required for Anthropic".to_string())?;

        let body = AnthropicRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: request.prompt() }],
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(request.instructions.clone()),
        };

        let resp = self
            .http
            .post(format!("{}/messages", self.config.base_url().trim_end_matches('/')))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request error: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Anthropic API error {}: {}", status, body));
        }

        let parsed: AnthropicResponse = resp.json().await.map_err(|e| format!("Parse error: {}", e))?;
        parsed
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| "No response from model".to_string())
    }
}

#[async_trait]
impl Answerer for LlmAnswerer {
    async fn answer(&self, request: &AnswerRequest) -> Result<String, QueryError> {
        debug!(
            "Asking {:?}/{} ({} bytes of snapshot)",
            self.config.provider,
            self.config.model,
            request.snapshot_json.len()
        );
        let raw = match self.config.provider {
            LlmProvider::Anthropic => self.call_anthropic(request).await,
            LlmProvider::OpenAI | LlmProvider::Custom => self.call_openai_compatible(request).await,
        }
        .map_err(QueryError::Answer)?;

        let answer = raw.trim().to_string();
        info!("Generated answer: {}", answer);
        Ok(answer)
    }
}
