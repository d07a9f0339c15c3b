use crate::protocol::{ChatMessage, ChatRequest, StreamEvent};
use futures_core::stream::BoxStream;
use reqwest::header::HeaderMap;
use reqwest::Url;

/// Normalized event stream handed back by the proxy.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// A fully prepared upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Inputs an adapter needs to build its payload.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub request: &'a ChatRequest,
    pub system_prompt: &'a str,
    pub key: &'a str,
}

impl<'a> Turn<'a> {
    /// Conversation to forward. Empty messages (a turn that streamed no text)
    /// stay in the transcript but are not sent: providers reject empty blocks.
    pub fn messages(&self) -> impl Iterator<Item = &'a ChatMessage> {
        self.request
            .messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
    }
}

/// What one line of a provider stream carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Text(String),
    /// The provider reported a failure in-stream; nothing useful follows.
    Failed(String),
}

/// Message of a top-level `{"error": ...}` payload, the shape OpenAI-compatible
/// and Gemini endpoints use for failures after the stream has started.
pub fn error_message(payload: &serde_json::Value) -> Option<String> {
    let err = payload.get("error")?;
    let message = match err {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(o) => match o.get("message").and_then(|m| m.as_str()) {
            Some(m) => m.to_string(),
            None => err.to_string(),
        },
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    Some(message)
}

/// Per-provider translation at both ends of the proxy.
pub trait Adapter: Send + Sync {
    /// Name used in logs and in error deltas (e.g. "openai").
    fn name(&self) -> &'static str;

    /// Inbound request -> provider-specific url, headers and JSON body.
    fn build_request(&self, turn: &Turn<'_>) -> anyhow::Result<UpstreamRequest>;

    /// One complete line of the provider's stream -> delta text or an
    /// in-stream failure, if the line carries either.
    fn parse_line(&self, line: &str) -> Option<LineEvent>;
}
