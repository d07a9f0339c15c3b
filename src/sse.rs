//! Line-level SSE handling shared by upstream parsing and the consumer.
//!
//! Bytes arrive in arbitrary chunks; a line may be split across reads (and a
//! multi-byte character across a line fragment), so decoding happens only once
//! a full `\n`-terminated line is buffered.

use crate::protocol::DONE_MARKER;
use anyhow::anyhow;

/// Accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk. Returns every line it completed, without the
    /// trailing `\n` / `\r\n`. The unterminated tail stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<anyhow::Result<String>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            out.push(
                String::from_utf8(line).map_err(|e| anyhow!(e).context("SSE line is not valid UTF-8")),
            );
        }

        out
    }

    /// Bytes of the partial line still waiting for its terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Payload of a `data:` line.
    Data(&'a str),
    /// `data: [DONE]`.
    Done,
    /// Blank lines, `:` comments and non-data fields (`event:`, `id:`, ...).
    Ignored,
}

pub fn classify(line: &str) -> SseLine<'_> {
    if line.trim().is_empty() || line.starts_with(':') {
        return SseLine::Ignored;
    }
    let Some(rest) = line.strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    let payload = rest.trim();
    if payload == DONE_MARKER {
        SseLine::Done
    } else {
        SseLine::Data(payload)
    }
}

/// Payload of a `data:` line, `None` for anything else including `[DONE]`.
pub fn data_payload(line: &str) -> Option<&str> {
    match classify(line) {
        SseLine::Data(p) => Some(p),
        _ => None,
    }
}
