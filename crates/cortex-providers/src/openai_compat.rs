//! A generic OpenAI-compatible HTTP provider. Spec.md explicitly leaves the
//! LLM wire format unchosen; this is offered as the default concrete
//! `LlmProvider` because the OpenAI chat-completions shape is the one most
//! self-hosted and third-party backends already speak (local runtimes,
//! hosted aggregators, and OpenAI itself), so it covers the common case
//! without hardwiring a single vendor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{
    ChatRequest, ChatResponse, ContentBlock, LlmProvider, ProviderError, Role, StopReason, Usage,
};

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    chat_path: String,
    provider_name: String,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
            chat_path: "/v1/chat/completions".to_string(),
            provider_name: name.into(),
        }
    }

    pub fn with_chat_path(mut self, path: impl Into<String>) -> Self {
        self.chat_path = path.into();
        self
    }
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

fn to_api_messages(req: &ChatRequest) -> Vec<ApiMessage> {
    let mut out = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = &req.system {
        out.push(ApiMessage { role: "system", content: system.clone() });
    }
    for m in &req.messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        out.push(ApiMessage { role, content: m.text() });
    }
    out
}

fn stop_reason_of(finish_reason: Option<&str>) -> StopReason {
    match finish_reason {
        Some("length") => StopReason::MaxTokens,
        Some("stop") | None => StopReason::EndTurn,
        Some(_) => StopReason::EndTurn,
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = ApiRequest {
            model: req.model.clone(),
            messages: to_api_messages(req),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let url = format!("{}{}", self.base_url, self.chat_path);
        debug!(model = %req.model, provider = %self.provider_name, "sending chat completion request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, provider = %self.provider_name, "API error");
            return Err(ProviderError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

        Ok(ChatResponse {
            content: vec![ContentBlock::Text { text: choice.message.content.unwrap_or_default() }],
            model: api_resp.model,
            stop_reason: stop_reason_of(choice.finish_reason.as_deref()),
            usage: Usage {
                input_tokens: api_resp.usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(0),
                output_tokens: api_resp.usage.as_ref().and_then(|u| u.completion_tokens).unwrap_or(0),
            },
        })
    }
}
