//! Stream Proxy: one chat request in, one normalized event stream out.
//!
//! Every outcome is a well-formed stream. Configuration problems fall back to
//! a canned reply, upstream failures become a final in-band delta, and the
//! stream always terminates with `Done` (or an `Error`, which encodes as a
//! delta followed by `[DONE]`).

use crate::config::Config;
use crate::error::UpstreamError;
use crate::prompt;
use crate::protocol::{ChatRequest, Providers, StreamEvent};
use crate::provider::{
    self, fallback, openai::OpenAiAdapter, Adapter, EventStream, ProviderKind, ProviderTable,
    Turn,
};
use anyhow::{anyhow, Context};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which upstream serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Provider(ProviderKind, &'a str),
    Gateway,
    Fallback,
}

#[derive(Clone)]
pub struct Proxy {
    http: reqwest::Client,
    table: Arc<ProviderTable>,
    gateway: Option<(Arc<OpenAiAdapter>, String)>,
    fallback_delay: Duration,
    idle_timeout: Duration,
    max_body_bytes: usize,
}

impl Proxy {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(cfg.server.connect_timeout())
            .build()
            .context("failed to build HTTP client")?;
        Self::with_client(cfg, http)
    }

    pub fn with_client(cfg: &Config, http: reqwest::Client) -> anyhow::Result<Self> {
        let gateway = match cfg.gateway.active() {
            Some((url, key)) => {
                let model = cfg
                    .gateway
                    .model
                    .as_deref()
                    .unwrap_or(provider::openai::GATEWAY_MODEL);
                match OpenAiAdapter::new("gateway", url, model) {
                    Ok(adapter) => Some((Arc::new(adapter), key.to_string())),
                    Err(e) => {
                        let reason = format!("{e:#}");
                        warn!(error = %reason, "ignoring misconfigured gateway");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            http,
            table: Arc::new(ProviderTable::from_config(&cfg.providers)?),
            gateway,
            fallback_delay: Duration::from_millis(cfg.fallback.chunk_delay_ms),
            idle_timeout: cfg.server.upstream_idle_timeout(),
            max_body_bytes: cfg.server.max_body_bytes,
        })
    }

    pub fn route<'a>(&self, providers: &'a Providers) -> Route<'a> {
        if let Some((kind, key)) = provider::select(providers) {
            return Route::Provider(kind, key);
        }
        if self.gateway.is_some() {
            Route::Gateway
        } else {
            Route::Fallback
        }
    }

    /// Entry point for raw request bodies. A body that does not parse still
    /// yields a terminated stream.
    pub async fn open_body(&self, body: &[u8]) -> EventStream {
        match serde_json::from_slice::<ChatRequest>(body) {
            Ok(req) => self.open(req).await,
            Err(e) => self.reject_body(anyhow!(e).context("invalid request body")),
        }
    }

    /// Largest request body the server reads.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Stream for a request whose body could not be read or parsed.
    pub fn reject_body(&self, err: anyhow::Error) -> EventStream {
        let err = UpstreamError::Request(err);
        warn!(error = %err, "rejected chat request body");
        once(StreamEvent::error(err.to_string()))
    }

    pub async fn open(&self, req: ChatRequest) -> EventStream {
        if req.messages.is_empty() {
            warn!("chat request without messages");
            let err = UpstreamError::Request(anyhow!("the conversation has no messages"));
            return once(StreamEvent::error(err.to_string()));
        }

        info!(
            language = %req.language,
            messages = req.messages.len(),
            "chat request"
        );
        for kind in ProviderKind::PRIORITY {
            match req.providers.key(kind) {
                Some(key) => debug!(provider = %kind, key_len = key.len(), "key present"),
                None => debug!(provider = %kind, "no key or disabled"),
            }
        }

        let (adapter, key): (Arc<dyn Adapter>, &str) = match self.route(&req.providers) {
            Route::Provider(kind, key) => (self.table.adapter(kind), key),
            Route::Gateway => match &self.gateway {
                Some((adapter, key)) => (adapter.clone() as Arc<dyn Adapter>, key.as_str()),
                None => return self.fallback(&req),
            },
            Route::Fallback => return self.fallback(&req),
        };

        let system_prompt = prompt::system_prompt(&req.language, &req.code);
        let upstream = match adapter.build_request(&Turn {
            request: &req,
            system_prompt: &system_prompt,
            key,
        }) {
            Ok(u) => u,
            Err(e) => {
                warn!(provider = adapter.name(), error = %e, "failed to build upstream request");
                return once(StreamEvent::error(UpstreamError::Request(e).to_string()));
            }
        };

        let provider_name = adapter.name();
        info!(provider = provider_name, "forwarding to upstream");
        match provider::stream_upstream(&self.http, adapter, upstream, self.idle_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(provider = provider_name, error = %e, "upstream failed");
                once(StreamEvent::error(e.to_string()))
            }
        }
    }

    fn fallback(&self, req: &ChatRequest) -> EventStream {
        info!("no provider available, streaming fallback reply");
        fallback::stream(
            prompt::fallback_text(&req.language, &req.code),
            self.fallback_delay,
        )
    }
}

fn once(event: StreamEvent) -> EventStream {
    Box::pin(tokio_stream::iter(vec![event]))
}
