//! Error types for the two ends of the stream.
//!
//! Upstream errors never become HTTP failures of the proxy: their `Display`
//! text is what the proxy emits in-band as the final delta.

use std::time::Duration;
use thiserror::Error;

/// Upstream bodies are quoted in error deltas up to this many characters.
pub const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Error from {provider} API ({status}): {body}...\n\nPlease check your API key and try again.")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Rate limit reached on the {provider} API (429). Please wait a moment and try again.")]
    RateLimited { provider: &'static str },

    #[error("The {provider} API requires payment (402): the account has run out of credits or quota. Add credits or configure your own API key in settings.")]
    PaymentRequired { provider: &'static str },

    #[error("Stream from {provider} API went silent for {}s and was closed.", .idle.as_secs())]
    Idle {
        provider: &'static str,
        idle: Duration,
    },

    #[error("\n\n[Stream from {provider} API was interrupted: {source}]")]
    Interrupted {
        provider: &'static str,
        source: reqwest::Error,
    },

    #[error("\n\n[{provider} API reported an error: {message}]")]
    Reported {
        provider: &'static str,
        message: String,
    },

    #[error("Unexpected error: {0}\n\nPlease check the server logs for details.")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected error: {0:#}")]
    Request(anyhow::Error),
}

impl UpstreamError {
    /// Classify a non-success upstream response.
    pub fn from_status(provider: &'static str, status: u16, body: &str) -> Self {
        match status {
            429 => UpstreamError::RateLimited { provider },
            402 => UpstreamError::PaymentRequired { provider },
            _ => UpstreamError::Status {
                provider,
                status,
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            },
        }
    }
}

/// Why a consumer turn failed. Shown to the user as a notification.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Edge function failed: {0}")]
    Status(reqwest::StatusCode),

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no data received for {}s", .0.as_secs())]
    IdleTimeout(Duration),

    #[error("failed to load provider credentials: {0:#}")]
    Credentials(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_quota_and_rate_limit() {
        assert!(matches!(
            UpstreamError::from_status("gateway", 429, ""),
            UpstreamError::RateLimited { provider: "gateway" }
        ));
        let e = UpstreamError::from_status("gateway", 402, "{}");
        assert!(e.to_string().contains("requires payment (402)"));
    }

    #[test]
    fn status_body_is_truncated_on_char_boundary() {
        let body = "é".repeat(500);
        let e = UpstreamError::from_status("openai", 500, &body);
        let UpstreamError::Status { body, status, .. } = &e else {
            panic!("expected Status, got {e:?}");
        };
        assert_eq!(*status, 500);
        assert_eq!(body.chars().count(), ERROR_BODY_LIMIT);
        assert!(e.to_string().starts_with("Error from openai API (500): éé"));
        assert!(e.to_string().ends_with("Please check your API key and try again."));
    }

    #[test]
    fn turn_status_message() {
        let e = TurnError::Status(reqwest::StatusCode::BAD_GATEWAY);
        assert_eq!(e.to_string(), "Edge function failed: 502 Bad Gateway");
    }
}
