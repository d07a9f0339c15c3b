//! Anthropic Messages API.
//!
//! The system preamble goes in its own field; the message list only carries
//! `user` and `assistant` turns. Text arrives in `content_block_delta` events.

use super::{error_message, Adapter, LineEvent, Turn, UpstreamRequest};
use crate::config::ProviderSettings;
use crate::sse;
use anyhow::{anyhow, Context};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    url: Url,
    model: String,
    max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(settings: &ProviderSettings, max_tokens: u32) -> anyhow::Result<Self> {
        let url = settings.url.as_deref().unwrap_or(ANTHROPIC_URL);
        Ok(Self {
            url: Url::parse(url).with_context(|| format!("invalid anthropic url: {url}"))?,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| ANTHROPIC_MODEL.to_string()),
            max_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<BlockDelta>,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

impl Adapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn build_request(&self, turn: &Turn<'_>) -> anyhow::Result<UpstreamRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(turn.key).map_err(|e| anyhow!(e))?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let body = serde_json::to_value(MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: turn.system_prompt,
            messages: turn
                .messages()
                .map(|m| Message {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
        })?;

        Ok(UpstreamRequest {
            url: self.url.clone(),
            headers,
            body,
        })
    }

    fn parse_line(&self, line: &str) -> Option<LineEvent> {
        let data = sse::data_payload(line)?;
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparsable anthropic event");
                return None;
            }
        };
        let payload: StreamPayload = serde_json::from_value(value.clone()).ok()?;
        match payload.kind.as_str() {
            "content_block_delta" => payload
                .delta?
                .text
                .filter(|t| !t.is_empty())
                .map(LineEvent::Text),
            // e.g. overloaded_error, sent after a 200 response has started.
            "error" => Some(LineEvent::Failed(
                error_message(&value).unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => None,
        }
    }
}
