//! Anthropic Messages API adapter (C2). Anthropic's wire format takes `system`
//! as a top-level field separate from `messages`, which may not itself carry
//! a system turn — adapters must silently partition rather than erroring.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{CallParams, Provider};
use crate::types::{estimate_tokens, LlmResponse, Message, MessageRole};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            name: "anthropic".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Partitions `params` into an optional `system` string and a `messages`
    /// array containing no system turns, the shape Anthropic's API requires.
    fn partition(&self, params: &CallParams) -> Result<(Option<String>, Vec<WireMessage>)> {
        if let Some(messages) = &params.messages {
            let mut system_parts = Vec::new();
            let mut turns = Vec::new();
            for message in messages {
                match message.role {
                    MessageRole::System => system_parts.push(message.content.clone()),
                    MessageRole::User | MessageRole::Assistant => {
                        turns.push(WireMessage::from_message(message));
                    }
                }
            }
            let system = if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            };
            return Ok((system, turns));
        }

        let user = params
            .user_prompt
            .as_ref()
            .ok_or_else(|| Error::input("call requires either messages or user_prompt"))?;
        Ok((
            params.system_prompt.clone(),
            vec![WireMessage {
                role: "user".to_string(),
                content: user.clone(),
            }],
        ))
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
            MessageRole::Assistant => "assistant",
            _ => "user",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentPart>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageOut>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageOut {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[async_trait]
impl Provider for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, params: CallParams) -> Result<LlmResponse> {
        let (system, messages) = self.partition(&params)?;
        let request = MessagesRequest {
            model: self.model.clone(),
            messages,
            max_tokens: params.max_tokens.unwrap_or(4096),
            system,
            temperature: params.temperature,
        };

        let start = Instant::now();
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.name.clone())
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
            return Err(Error::rate_limit(self.name.clone(), retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(self.name.clone(), Some(status.as_u16()), body));
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let body: MessagesResponse = response.json().await.map_err(Error::Http)?;
        let content = body
            .content
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        let (tokens_input, tokens_output) = match body.usage {
            Some(usage) => (
                usage.input_tokens.unwrap_or_else(|| estimate_tokens(&content)),
                usage.output_tokens.unwrap_or_else(|| estimate_tokens(&content)),
            ),
            None => (estimate_tokens(&content), estimate_tokens(&content)),
        };

        Ok(LlmResponse {
            content,
            tokens_input,
            tokens_output,
            latency_ms: elapsed_ms,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            finish_reason: body.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
            provider_name: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new("key", "claude-3-5-sonnet-latest", Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn partition_pulls_system_turns_out_of_messages() {
        let params = CallParams {
            messages: Some(vec![
                Message::system("be terse"),
                Message::user("hi"),
                Message::assistant("hello"),
            ]),
            ..Default::default()
        };
        let (system, messages) = adapter().partition(&params).unwrap();
        assert_eq!(system, Some("be terse".to_string()));
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role != "system"));
    }

    #[test]
    fn partition_uses_system_prompt_field_when_no_messages() {
        let params = CallParams::simple("be terse", "hi");
        let (system, messages) = adapter().partition(&params).unwrap();
        assert_eq!(system, Some("be terse".to_string()));
        assert_eq!(messages.len(), 1);
    }
}
