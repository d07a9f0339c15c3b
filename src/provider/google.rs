use super::{error_message, Adapter, LineEvent, Turn, UpstreamRequest};
use crate::config::ProviderSettings;
use crate::protocol::Role;
use crate::sse;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/";
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Gemini `streamGenerateContent`. The key travels as a query parameter, so
/// request urls must never be logged.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    api_base: Url,
    model: String,
}

impl GoogleAdapter {
    pub fn new(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let base = settings.url.as_deref().unwrap_or(GEMINI_API_BASE);
        Ok(Self {
            api_base: Url::parse(base).with_context(|| format!("invalid gemini url: {base}"))?,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_MODEL.to_string()),
        })
    }

    fn build_url(&self, key: &str) -> anyhow::Result<Url> {
        // alt=sse makes every chunk of the candidate array a `data:` line.
        let mut url = self
            .api_base
            .join(&format!("v1beta/models/{}:streamGenerateContent", self.model))?;
        url.query_pairs_mut()
            .append_pair("key", key)
            .append_pair("alt", "sse");
        Ok(url)
    }
}

impl Adapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn build_request(&self, turn: &Turn<'_>) -> anyhow::Result<UpstreamRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // No system role: the preamble becomes a leading user turn.
        let mut contents = Vec::with_capacity(turn.request.messages.len() + 1);
        contents.push(Content::text("user", turn.system_prompt));
        contents.extend(turn.messages().map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                Role::User => "user",
            };
            Content::text(role, &m.content)
        }));

        let body = serde_json::to_value(StreamGenerateContentRequest { contents })?;

        Ok(UpstreamRequest {
            url: self.build_url(turn.key)?,
            headers,
            body,
        })
    }

    fn parse_line(&self, line: &str) -> Option<LineEvent> {
        let data = sse::data_payload(line)?;
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparsable gemini chunk");
                return None;
            }
        };
        if let Some(message) = error_message(&value) {
            return Some(LineEvent::Failed(message));
        }
        let r: StreamGenerateContentResponse = serde_json::from_value(value).ok()?;
        extract_text(&r).map(LineEvent::Text)
    }
}

#[derive(Debug, Clone, Serialize)]
struct StreamGenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamGenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

fn extract_text(r: &StreamGenerateContentResponse) -> Option<String> {
    // Concatenate all text parts of the first candidate.
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, ChatRequest};

    #[test]
    fn key_in_query_and_roles_mapped() {
        let adapter = GoogleAdapter::new(&ProviderSettings::default()).unwrap();
        let req = ChatRequest {
            messages: vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
            code: String::new(),
            language: String::new(),
            providers: Default::default(),
        };
        let up = adapter
            .build_request(&Turn {
                request: &req,
                system_prompt: "SYS",
                key: "g-key",
            })
            .unwrap();

        assert_eq!(
            up.url.path(),
            "/v1beta/models/gemini-1.5-flash:streamGenerateContent"
        );
        let query: Vec<_> = up.url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert!(query.contains(&("key".into(), "g-key".into())));
        assert!(query.contains(&("alt".into(), "sse".into())));
        assert!(!up.headers.contains_key("authorization"));

        let contents = up.body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "SYS");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[2]["role"], "model");
    }

    #[test]
    fn concatenates_parts_of_first_candidate() {
        let a = GoogleAdapter::new(&ProviderSettings::default()).unwrap();
        let line = r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"a"},{"text":"b"}]}},{"content":{"parts":[{"text":"z"}]}}]}"#;
        assert_eq!(a.parse_line(line), Some(LineEvent::Text("ab".into())));
        assert_eq!(a.parse_line(r#"data: {"candidates":[]}"#), None);
        assert_eq!(a.parse_line(r#"data: {"usageMetadata":{}}"#), None);
    }

    #[test]
    fn error_payload_is_reported() {
        let a = GoogleAdapter::new(&ProviderSettings::default()).unwrap();
        let line = r#"data: {"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            a.parse_line(line),
            Some(LineEvent::Failed("The model is overloaded.".into()))
        );
    }

    #[test]
    fn empty_model_turn_is_not_sent() {
        let adapter = GoogleAdapter::new(&ProviderSettings::default()).unwrap();
        let req = ChatRequest {
            messages: vec![
                ChatMessage::user("q1"),
                ChatMessage::assistant(""),
                ChatMessage::user("q2"),
            ],
            code: String::new(),
            language: String::new(),
            providers: Default::default(),
        };
        let up = adapter
            .build_request(&Turn {
                request: &req,
                system_prompt: "SYS",
                key: "g-key",
            })
            .unwrap();

        let contents = up.body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert!(contents
            .iter()
            .all(|c| c["parts"][0]["text"].as_str().is_some_and(|t| !t.is_empty())));
        assert_eq!(contents[2]["parts"][0]["text"], "q2");
    }
}
