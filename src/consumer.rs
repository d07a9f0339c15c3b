//! Stream Consumer: drives one request/stream cycle per user turn.
//!
//! The transcript is keyed by turn id. The reply for a turn is created by its
//! first delta and replaced in place by every later one, so the rest of the
//! transcript can change shape without the update landing on the wrong entry.
//! Subscribers get a [`SessionEvent`] after every change.

use crate::config::ClientConfig;
use crate::credentials::CredentialSource;
use crate::error::TurnError;
use crate::protocol::{ChatMessage, ChatRequest, ChunkPayload};
use crate::sse::{self, LineBuffer, SseLine};
use anyhow::Context;
use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Terminal reply appended when a turn fails.
pub const FAILURE_REPLY: &str = "Sorry, I encountered an error. Please check that the assist endpoint is reachable and try again.";

pub type TurnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Prompt,
    Reply,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub turn: TurnId,
    pub kind: EntryKind,
    pub message: ChatMessage,
}

/// Ordered, append-only conversation; only a turn's own reply is ever
/// rewritten.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn push_prompt(&mut self, turn: TurnId, text: &str) {
        self.entries.push(TranscriptEntry {
            turn,
            kind: EntryKind::Prompt,
            message: ChatMessage::user(text),
        });
    }

    /// Replace the reply of `turn`, creating it if this is the first update.
    pub fn upsert_reply(&mut self, turn: TurnId, content: &str) {
        match self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.turn == turn && e.kind == EntryKind::Reply)
        {
            Some(entry) => {
                entry.message.content.clear();
                entry.message.content.push_str(content);
            }
            None => self.entries.push(TranscriptEntry {
                turn,
                kind: EntryKind::Reply,
                message: ChatMessage::assistant(content),
            }),
        }
    }

    pub fn push_failure(&mut self, turn: TurnId, text: &str) {
        self.entries.push(TranscriptEntry {
            turn,
            kind: EntryKind::Failure,
            message: ChatMessage::assistant(text),
        });
    }

    pub fn reply(&self, turn: TurnId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.turn == turn && e.kind == EntryKind::Reply)
            .map(|e| e.message.content.as_str())
    }
}

/// Incremental decoder for the normalized stream.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    lines: LineBuffer,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub deltas: Vec<String>,
    /// `[DONE]` was seen; anything after it in the chunk is dropped.
    pub done: bool,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        for line in self.lines.push(chunk) {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable SSE line");
                    continue;
                }
            };
            match sse::classify(&line) {
                SseLine::Ignored => {}
                SseLine::Done => {
                    out.done = true;
                    return out;
                }
                SseLine::Data(payload) => match serde_json::from_str::<ChunkPayload>(payload) {
                    Ok(chunk) => {
                        if let Some(text) = chunk.content() {
                            out.deltas.push(text.to_string());
                        }
                    }
                    Err(e) => warn!(error = %e, line = %line, "skipping malformed SSE line"),
                },
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TurnStarted {
        turn: TurnId,
    },
    /// `content` is the whole reply so far, not just the new fragment.
    Delta {
        turn: TurnId,
        content: String,
    },
    TurnCompleted {
        turn: TurnId,
    },
    /// User-visible error notification.
    TurnFailed {
        turn: TurnId,
        title: String,
        description: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub turn: TurnId,
    /// Reply text accumulated before the turn ended (possibly partial).
    pub content: String,
    pub status: TurnStatus,
}

/// Editor state sent along with each turn.
#[derive(Debug, Clone, Default)]
pub struct CodeContext {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: Url,
    pub anon_key: Option<String>,
    pub idle_timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(cfg: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: Url::parse(&cfg.endpoint)
                .with_context(|| format!("invalid client endpoint: {}", cfg.endpoint))?,
            anon_key: cfg.anon_key.clone().filter(|k| !k.is_empty()),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
        })
    }
}

/// Clears the in-flight flag when the turn ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChatSession {
    http: reqwest::Client,
    settings: ClientSettings,
    credentials: Arc<dyn CredentialSource>,
    context: Mutex<CodeContext>,
    transcript: Mutex<Transcript>,
    next_turn: AtomicU64,
    in_flight: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    pub fn new(
        http: reqwest::Client,
        settings: ClientSettings,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            http,
            settings,
            credentials,
            context: Mutex::new(CodeContext::default()),
            transcript: Mutex::new(Transcript::default()),
            next_turn: AtomicU64::new(1),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_context(&self, code: impl Into<String>, language: impl Into<String>) {
        let mut ctx = lock(&self.context);
        ctx.code = code.into();
        ctx.language = language.into();
    }

    pub fn set_language(&self, language: impl Into<String>) {
        lock(&self.context).language = language.into();
    }

    pub fn language(&self) -> String {
        lock(&self.context).language.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn transcript(&self) -> Transcript {
        lock(&self.transcript).clone()
    }

    pub fn clear(&self) {
        if !self.is_in_flight() {
            *lock(&self.transcript) = Transcript::default();
        }
    }

    /// Send one user turn and stream the reply into the transcript.
    ///
    /// Returns `None` without doing anything for blank input or while another
    /// turn is in flight. Failures never escape: they end the turn with a
    /// terminal reply and a `TurnFailed` event.
    pub async fn send_turn(&self, text: &str) -> Option<TurnOutcome> {
        if text.trim().is_empty() {
            return None;
        }
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("turn already in flight, ignoring send");
            return None;
        };

        let turn = self.next_turn.fetch_add(1, Ordering::Relaxed);
        lock(&self.transcript).push_prompt(turn, text);
        self.emit(SessionEvent::TurnStarted { turn });

        let mut content = String::new();
        let status = match self.stream_turn(turn, &mut content).await {
            Ok(()) => {
                // A turn with no deltas still gets its (empty) reply.
                lock(&self.transcript).upsert_reply(turn, &content);
                info!(turn, chars = content.len(), "turn completed");
                self.emit(SessionEvent::TurnCompleted { turn });
                TurnStatus::Completed
            }
            Err(e) => {
                warn!(turn, error = %e, "turn failed");
                lock(&self.transcript).push_failure(turn, FAILURE_REPLY);
                self.emit(SessionEvent::TurnFailed {
                    turn,
                    title: "Error".to_string(),
                    description: e.to_string(),
                });
                TurnStatus::Failed(e.to_string())
            }
        };

        Some(TurnOutcome {
            turn,
            content,
            status,
        })
    }

    async fn stream_turn(&self, turn: TurnId, content: &mut String) -> Result<(), TurnError> {
        // Credentials are re-read on every send.
        let providers = self.credentials.load().map_err(TurnError::Credentials)?;
        let ctx = lock(&self.context).clone();
        let request = ChatRequest {
            messages: lock(&self.transcript).messages(),
            code: ctx.code,
            language: ctx.language,
            providers,
        };

        debug!(turn, endpoint = %self.settings.endpoint, "sending turn");
        let mut builder = self.http.post(self.settings.endpoint.clone()).json(&request);
        if let Some(key) = &self.settings.anon_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        let resp = builder.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(turn, %status, body = %body, "assist endpoint error");
            return Err(TurnError::Status(status));
        }

        let idle = self.settings.idle_timeout;
        let mut stream = resp.bytes_stream();
        let mut decoder = DeltaDecoder::new();

        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| TurnError::IdleTimeout(idle))?;
            // End of body without `[DONE]` still completes the turn.
            let Some(chunk) = next else {
                return Ok(());
            };
            let decoded = decoder.feed(&chunk?);
            for delta in decoded.deltas {
                content.push_str(&delta);
                lock(&self.transcript).upsert_reply(turn, content);
                self.emit(SessionEvent::Delta {
                    turn,
                    content: content.clone(),
                });
            }
            if decoded.done {
                return Ok(());
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
