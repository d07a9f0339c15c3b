//! Upstream providers: fixed priority selection, the adapter table and the
//! driver that turns an upstream response into normalized events.

pub mod anthropic;
pub mod fallback;
pub mod google;
pub mod openai;
mod types;

pub use types::{error_message, Adapter, EventStream, LineEvent, Turn, UpstreamRequest};

use crate::config::ProvidersConfig;
use crate::error::UpstreamError;
use crate::protocol::{Providers, StreamEvent};
use crate::sse::{self, LineBuffer, SseLine};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
}

impl ProviderKind {
    /// Selection order: the first configured provider wins.
    pub const PRIORITY: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
        }
    }

    fn index(self) -> usize {
        match self {
            ProviderKind::OpenAi => 0,
            ProviderKind::Anthropic => 1,
            ProviderKind::Gemini => 2,
            ProviderKind::DeepSeek => 3,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First provider in priority order with a non-empty key.
pub fn select(providers: &Providers) -> Option<(ProviderKind, &str)> {
    ProviderKind::PRIORITY
        .into_iter()
        .find_map(|kind| providers.key(kind).map(|key| (kind, key)))
}

/// Adapter per provider, indexed in priority order.
pub struct ProviderTable {
    adapters: [Arc<dyn Adapter>; 4],
}

impl ProviderTable {
    pub fn from_config(cfg: &ProvidersConfig) -> anyhow::Result<Self> {
        Ok(Self {
            adapters: [
                Arc::new(openai::OpenAiAdapter::openai(&cfg.openai)?) as Arc<dyn Adapter>,
                Arc::new(anthropic::AnthropicAdapter::new(
                    &cfg.anthropic,
                    cfg.anthropic_max_tokens,
                )?) as Arc<dyn Adapter>,
                Arc::new(google::GoogleAdapter::new(&cfg.gemini)?) as Arc<dyn Adapter>,
                Arc::new(openai::OpenAiAdapter::deepseek(&cfg.deepseek)?) as Arc<dyn Adapter>,
            ],
        })
    }

    pub fn adapter(&self, kind: ProviderKind) -> Arc<dyn Adapter> {
        self.adapters[kind.index()].clone()
    }
}

/// Send `upstream` and re-emit its stream as normalized events.
///
/// A non-success status is returned as an error before any event is produced.
/// Once streaming, failures are delivered in-band as a terminal `Error` event;
/// otherwise the stream ends with `Done`.
pub async fn stream_upstream(
    http: &reqwest::Client,
    adapter: Arc<dyn Adapter>,
    upstream: UpstreamRequest,
    idle: Duration,
) -> Result<EventStream, UpstreamError> {
    let provider = adapter.name();

    let resp = http
        .post(upstream.url)
        .headers(upstream.headers)
        .json(&upstream.body)
        .send()
        .await?;

    let status = resp.status();
    debug!(provider, %status, "upstream responded");
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        error!(provider, %status, body = %text, "upstream error");
        return Err(UpstreamError::from_status(provider, status.as_u16(), &text));
    }

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);

    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::new();

        'read: loop {
            let next = match tokio::time::timeout(idle, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(provider, idle_secs = idle.as_secs(), "upstream idle timeout");
                    let msg = UpstreamError::Idle { provider, idle }.to_string();
                    let _ = tx.send(StreamEvent::error(msg)).await;
                    return;
                }
            };

            let bytes = match next {
                Some(Ok(b)) => b,
                Some(Err(e)) => {
                    error!(provider, error = %e, "upstream stream interrupted");
                    let msg = UpstreamError::Interrupted { provider, source: e }.to_string();
                    let _ = tx.send(StreamEvent::error(msg)).await;
                    return;
                }
                None => break,
            };

            for line in lines.push(&bytes) {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(provider, error = %e, "skipping undecodable upstream line");
                        continue;
                    }
                };
                if sse::classify(&line) == SseLine::Done {
                    break 'read;
                }
                match adapter.parse_line(&line) {
                    Some(LineEvent::Text(text)) => {
                        if tx.send(StreamEvent::delta(text)).await.is_err() {
                            debug!(provider, "client went away");
                            return;
                        }
                    }
                    Some(LineEvent::Failed(message)) => {
                        error!(provider, message = %message, "upstream reported an error mid-stream");
                        let msg = UpstreamError::Reported { provider, message }.to_string();
                        let _ = tx.send(StreamEvent::error(msg)).await;
                        return;
                    }
                    None => {}
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}
