//! Shared adapter for every upstream that speaks the OpenAI chat-completions
//! wire format: Groq, Cerebras, Gemini (OpenAI-compat mode), OpenAI itself,
//! and local OpenAI-compatible servers (LM Studio, Ollama, vLLM, llama.cpp).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{CallParams, Provider};
use crate::types::{estimate_tokens, LlmResponse, Message, MessageRole};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl WireMessage {
    fn from_message(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

/// Shared chat-completions call used by every OpenAI-wire-format adapter,
/// including [`super::openrouter::OpenRouterAdapter`] which needs to vary
/// `model` per retry attempt rather than holding it fixed on `self`.
pub(super) async fn chat_completion_call(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    provider_name: &str,
    model: &str,
    params: &CallParams,
) -> Result<LlmResponse> {
    let messages = build_wire_messages(params)?;
    let request = ChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: params.max_tokens,
        temperature: params.temperature,
    };

    let start = Instant::now();
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::timeout(provider_name.to_string())
            } else {
                Error::Http(e)
            }
        })?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(crate::retry::parse_retry_after);
        return Err(Error::rate_limit(provider_name.to_string(), retry_after));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(provider_name.to_string(), Some(status.as_u16()), body));
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let body: ChatResponse = response.json().await.map_err(Error::Http)?;
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        Error::api(provider_name.to_string(), None, "empty choices array")
    })?;
    let content = choice.message.content.unwrap_or_default();
    let finish_reason = choice.finish_reason.unwrap_or_else(|| "stop".to_string());

    let (tokens_input, tokens_output) = match body.usage {
        Some(usage) => (
            usage.prompt_tokens.unwrap_or_else(|| estimate_tokens(&content)),
            usage.completion_tokens.unwrap_or_else(|| estimate_tokens(&content)),
        ),
        None => (estimate_tokens(&content), estimate_tokens(&content)),
    };

    Ok(LlmResponse {
        content,
        tokens_input,
        tokens_output,
        latency_ms: elapsed_ms,
        model: body.model.unwrap_or_else(|| model.to_string()),
        finish_reason,
        provider_name: provider_name.to_string(),
    })
}

fn build_wire_messages(params: &CallParams) -> Result<Vec<WireMessage>> {
    if let Some(messages) = &params.messages {
        return Ok(messages.iter().map(WireMessage::from_message).collect());
    }
    let mut out = Vec::with_capacity(2);
    if let Some(system) = &params.system_prompt {
        out.push(WireMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    let user = params
        .user_prompt
        .as_ref()
        .ok_or_else(|| Error::input("call requires either messages or user_prompt"))?;
    out.push(WireMessage {
        role: "user".to_string(),
        content: user.clone(),
    });
    Ok(out)
}

#[async_trait]
impl Provider for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, params: CallParams) -> Result<LlmResponse> {
        chat_completion_call(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.name,
            &self.model,
            &params,
        )
        .await
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Error::Http)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::api(
                self.name.clone(),
                Some(response.status().as_u16()),
                "health check failed",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_constructs_with_valid_timeout() {
        let adapter = OpenAiCompatibleAdapter::new(
            "groq",
            "https://api.groq.com/openai/v1",
            "key",
            "llama-3.1-70b-versatile",
            Duration::from_secs(30),
        );
        assert!(adapter.is_ok());
    }

    #[test]
    fn build_wire_messages_partitions_system_and_user() {
        let params = CallParams::simple("be helpful", "hello");
        let messages = build_wire_messages(&params).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn build_wire_messages_requires_user_prompt_or_messages() {
        let params = CallParams::default();
        assert!(build_wire_messages(&params).is_err());
    }

    #[test]
    fn build_wire_messages_prefers_explicit_messages_over_system_user() {
        let params = CallParams {
            messages: Some(vec![Message::user("hi")]),
            ..Default::default()
        };
        let messages = build_wire_messages(&params).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }
}
