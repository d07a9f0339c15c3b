//! Axum HTTP surface of the proxy.
//!
//! - `POST /ai-assist` (also `/functions/v1/ai-assist`): normalized SSE stream
//! - `OPTIONS`: answered by the CORS layer with an empty 200
//! - `GET /health`

use crate::config::Config;
use crate::proxy::Proxy;
use anyhow::Context;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub fn router(proxy: Proxy) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            CONTENT_TYPE,
        ]);

    Router::new()
        .route("/ai-assist", post(ai_assist))
        .route("/functions/v1/ai-assist", post(ai_assist))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .with_state(proxy)
}

pub async fn serve(cfg: &Config) -> anyhow::Result<()> {
    let proxy = Proxy::new(cfg)?;
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, gateway = cfg.gateway.active().is_some(), "ai-assist proxy listening");

    axum::serve(listener, router(proxy))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn ai_assist(State(proxy): State<Proxy>, body: Body) -> Response {
    // Read the body ourselves so an oversized one still gets an event stream.
    let events = match axum::body::to_bytes(body, proxy.max_body_bytes()).await {
        Ok(bytes) => proxy.open_body(&bytes).await,
        Err(e) => proxy.reject_body(anyhow::Error::new(e).context("failed to read request body")),
    };
    let frames = events.map(|ev| Ok::<_, Infallible>(ev.to_sse()));

    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_test_server() -> String {
        let mut cfg = Config::default();
        cfg.fallback.chunk_delay_ms = 0;
        let app = router(Proxy::new(&cfg).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://127.0.0.1:{}", addr.port())
    }

    #[tokio::test]
    async fn health_ok() {
        let base = start_test_server().await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn preflight_allows_listed_headers() {
        let base = start_test_server().await;
        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{base}/ai-assist"))
            .header("origin", "https://playground.example")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "authorization, x-client-info, apikey, content-type")
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let allowed = headers["access-control-allow-headers"].to_str().unwrap();
        for h in ["authorization", "x-client-info", "apikey", "content-type"] {
            assert!(allowed.contains(h), "{h} missing from {allowed}");
        }
        assert!(resp.text().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bare_options_is_empty_success() {
        let base = start_test_server().await;
        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{base}/ai-assist"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert!(resp.text().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_streams_event_stream_with_done() {
        let base = start_test_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/ai-assist"))
            .header("origin", "https://playground.example")
            .json(&serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "code": "",
                "language": "html",
                "providers": {"openai": null, "anthropic": null, "gemini": null, "deepseek": null}
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        let body = resp.text().await.unwrap();
        assert!(body.starts_with("data: {\"choices\""));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    fn chat_body(code: &str) -> serde_json::Value {
        serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}],
            "code": code,
            "language": "text",
        })
    }

    #[tokio::test]
    async fn body_above_axum_default_limit_is_served() {
        let base = start_test_server().await;
        let code = "a".repeat(3 * 1024 * 1024);
        let resp = reqwest::Client::new()
            .post(format!("{base}/ai-assist"))
            .json(&chat_body(&code))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.text().await.unwrap();
        assert!(body.contains(&code));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn oversized_body_gets_in_band_error() {
        let mut cfg = Config::default();
        cfg.server.max_body_bytes = 1024;
        let app = router(Proxy::new(&cfg).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ai-assist"))
            .json(&chat_body(&"x".repeat(4096)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        let body = resp.text().await.unwrap();
        assert!(body.contains("Unexpected error: failed to read request body"), "{body}");
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn garbage_body_still_gets_a_terminated_stream() {
        let base = start_test_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/ai-assist"))
            .body("nonsense")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.text().await.unwrap();
        assert!(body.contains("Unexpected error"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }
}
