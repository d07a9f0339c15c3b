//! Wire types shared by the proxy and the consumer.
//!
//! The normalized stream is OpenAI-shaped regardless of which upstream served
//! the request: every delta is a `data: {"choices":[{"delta":{"content":..}}]}`
//! frame and the stream ends with a literal `data: [DONE]` frame.

use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};

/// Terminator payload of the normalized stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub key: String,
}

impl ProviderCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Per-provider credentials as sent by the client. `null`, a missing entry and
/// an empty key all mean "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Providers {
    #[serde(default)]
    pub openai: Option<ProviderCredential>,
    #[serde(default)]
    pub anthropic: Option<ProviderCredential>,
    #[serde(default)]
    pub gemini: Option<ProviderCredential>,
    #[serde(default)]
    pub deepseek: Option<ProviderCredential>,
}

impl Providers {
    /// Usable key for `kind`, if any.
    pub fn key(&self, kind: ProviderKind) -> Option<&str> {
        let slot = match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::DeepSeek => &self.deepseek,
        };
        slot.as_ref()
            .map(|c| c.key.trim())
            .filter(|k| !k.is_empty())
    }

    pub fn set(&mut self, kind: ProviderKind, credential: Option<ProviderCredential>) {
        let slot = match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Anthropic => &mut self.anthropic,
            ProviderKind::Gemini => &mut self.gemini,
            ProviderKind::DeepSeek => &mut self.deepseek,
        };
        *slot = credential;
    }

    pub fn configured_count(&self) -> usize {
        ProviderKind::PRIORITY
            .iter()
            .filter(|k| self.key(**k).is_some())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub providers: Providers,
}

/// One unit of the normalized stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Delta { text: String },
    Done,
    Error { message: String },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    /// Encode as SSE frames. Errors travel in-band: one delta carrying the
    /// message, then the terminator.
    pub fn to_sse(&self) -> String {
        match self {
            StreamEvent::Delta { text } => delta_frame(text),
            StreamEvent::Done => done_frame(),
            StreamEvent::Error { message } => {
                let mut out = delta_frame(message);
                out.push_str(&done_frame());
                out
            }
        }
    }
}

fn delta_frame(text: &str) -> String {
    let payload = ChunkPayload::text(text);
    // Serializing plain structs of strings cannot fail.
    let json = serde_json::to_string(&payload).unwrap_or_default();
    format!("data: {json}\n\n")
}

fn done_frame() -> String {
    format!("data: {DONE_MARKER}\n\n")
}

/// OpenAI-style streaming chunk. Also the payload of every normalized delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChunkPayload {
    pub fn text(text: &str) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: Some(text.to_string()),
                },
            }],
        }
    }

    /// `choices[0].delta.content`, if non-empty.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()?
            .delta
            .content
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_frame_is_openai_shaped() {
        let frame = StreamEvent::delta("hi \"there\"").to_sse();
        assert_eq!(
            frame,
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi \\\"there\\\"\"}}]}\n\n"
        );
    }

    #[test]
    fn error_is_delta_then_done() {
        let frame = StreamEvent::error("boom").to_sse();
        assert!(frame.starts_with("data: {\"choices\""));
        assert!(frame.ends_with("data: [DONE]\n\n"));
        assert_eq!(frame.matches("data: ").count(), 2);
    }

    #[test]
    fn request_accepts_null_and_missing_providers() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],
                "providers":{"openai":null,"anthropic":{"key":""},"gemini":{"key":" g "}}}"#,
        )
        .unwrap();
        assert_eq!(req.messages, vec![ChatMessage::user("hi")]);
        assert_eq!(req.code, "");
        assert_eq!(req.providers.key(ProviderKind::OpenAi), None);
        assert_eq!(req.providers.key(ProviderKind::Anthropic), None);
        assert_eq!(req.providers.key(ProviderKind::Gemini), Some("g"));
        assert_eq!(req.providers.key(ProviderKind::DeepSeek), None);
        assert_eq!(req.providers.configured_count(), 1);
    }

    #[test]
    fn chunk_content_skips_null_and_empty() {
        let p: ChunkPayload =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":null}}]}"#).unwrap();
        assert_eq!(p.content(), None);
        let p: ChunkPayload = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(p.content(), None);
        let p: ChunkPayload =
            serde_json::from_str(r#"{"id":"x","choices":[{"index":0,"delta":{"content":"a"}}]}"#)
                .unwrap();
        assert_eq!(p.content(), Some("a"));
    }
}
