//! OpenAI-compatible chat completions. Serves OpenAI, DeepSeek and the
//! default gateway; they differ only in endpoint, model and name.

use super::{error_message, Adapter, LineEvent, Turn, UpstreamRequest};
use crate::config::ProviderSettings;
use crate::protocol::ChunkPayload;
use crate::sse;
use anyhow::{anyhow, Context};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;

pub const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEEPSEEK_URL: &str = "https://api.deepseek.com/chat/completions";
pub const DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const GATEWAY_MODEL: &str = "google/gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    name: &'static str,
    url: Url,
    model: String,
}

impl OpenAiAdapter {
    pub fn new(name: &'static str, url: &str, model: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            name,
            url: Url::parse(url).with_context(|| format!("invalid {name} url: {url}"))?,
            model: model.into(),
        })
    }

    pub fn openai(settings: &ProviderSettings) -> anyhow::Result<Self> {
        Self::new(
            "openai",
            settings.url.as_deref().unwrap_or(OPENAI_URL),
            settings.model.as_deref().unwrap_or(OPENAI_MODEL),
        )
    }

    pub fn deepseek(settings: &ProviderSettings) -> anyhow::Result<Self> {
        Self::new(
            "deepseek",
            settings.url.as_deref().unwrap_or(DEEPSEEK_URL),
            settings.model.as_deref().unwrap_or(DEEPSEEK_MODEL),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

impl Adapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn build_request(&self, turn: &Turn<'_>) -> anyhow::Result<UpstreamRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer =
            HeaderValue::from_str(&format!("Bearer {}", turn.key)).map_err(|e| anyhow!(e))?;
        headers.insert(AUTHORIZATION, bearer);

        let mut messages = Vec::with_capacity(turn.request.messages.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: turn.system_prompt,
        });
        messages.extend(turn.messages().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let body = serde_json::to_value(ChatCompletionsRequest {
            model: &self.model,
            messages,
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
                tracing::debug!(provider = self.name, error = %e, "unparsable chunk");
                return None;
            }
        };
        if let Some(message) = error_message(&value) {
            return Some(LineEvent::Failed(message));
        }
        let chunk: ChunkPayload = serde_json::from_value(value).ok()?;
        chunk.content().map(|t| LineEvent::Text(t.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, ChatRequest};

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("fix it"),
            ],
            code: "x".into(),
            language: "js".into(),
            providers: Default::default(),
        }
    }

    #[test]
    fn builds_bearer_request_with_system_first() {
        let adapter = OpenAiAdapter::openai(&ProviderSettings::default()).unwrap();
        let req = request();
        let up = adapter
            .build_request(&Turn {
                request: &req,
                system_prompt: "SYS",
                key: "sk-test",
            })
            .unwrap();

        assert_eq!(up.url.as_str(), OPENAI_URL);
        assert_eq!(up.headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(up.body["model"], OPENAI_MODEL);
        assert_eq!(up.body["stream"], true);
        let roles: Vec<_> = up.body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(up.body["messages"][0]["content"], "SYS");
    }

    #[test]
    fn deepseek_uses_its_own_endpoint() {
        let adapter = OpenAiAdapter::deepseek(&ProviderSettings::default()).unwrap();
        assert_eq!(adapter.name(), "deepseek");
        assert_eq!(adapter.model(), DEEPSEEK_MODEL);
        let req = request();
        let up = adapter
            .build_request(&Turn {
                request: &req,
                system_prompt: "",
                key: "k",
            })
            .unwrap();
        assert_eq!(up.url.as_str(), DEEPSEEK_URL);
    }

    #[test]
    fn parses_delta_lines() {
        let a = OpenAiAdapter::openai(&ProviderSettings::default()).unwrap();
        assert_eq!(
            a.parse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some(LineEvent::Text("Hel".into()))
        );
        assert_eq!(
            a.parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(a.parse_line("data: [DONE]"), None);
        assert_eq!(a.parse_line("data: {not json"), None);
        assert_eq!(a.parse_line(": ping"), None);
    }

    #[test]
    fn mid_stream_error_payload_is_reported() {
        let a = OpenAiAdapter::openai(&ProviderSettings::default()).unwrap();
        assert_eq!(
            a.parse_line(
                r#"data: {"error":{"message":"The server had an error while processing your request.","type":"server_error"}}"#
            ),
            Some(LineEvent::Failed(
                "The server had an error while processing your request.".into()
            ))
        );
    }

    #[test]
    fn rejects_key_with_newline() {
        let a = OpenAiAdapter::openai(&ProviderSettings::default()).unwrap();
        let req = request();
        let res = a.build_request(&Turn {
            request: &req,
            system_prompt: "",
            key: "bad\nkey",
        });
        assert!(res.is_err());
    }
}
