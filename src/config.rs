use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    /// Default provider used when the request carries no usable key.
    pub gateway: GatewayConfig,

    /// Endpoint and model overrides per provider.
    pub providers: ProvidersConfig,

    pub client: ClientConfig,

    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Close an upstream stream that sends nothing for this long.
    pub upstream_idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Larger request bodies get an in-band error instead of a reply.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            upstream_idle_timeout_secs: 120,
            connect_timeout_secs: 10,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn upstream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// OpenAI-compatible chat completions url.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl GatewayConfig {
    /// `(url, key)` when both are set and non-empty.
    pub fn active(&self) -> Option<(&str, &str)> {
        let url = self.url.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let key = self.api_key.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((url, key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderSettings {
    pub url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub gemini: ProviderSettings,
    pub deepseek: ProviderSettings,
    pub anthropic_max_tokens: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderSettings::default(),
            anthropic: ProviderSettings::default(),
            gemini: ProviderSettings::default(),
            deepseek: ProviderSettings::default(),
            anthropic_max_tokens: crate::provider::anthropic::DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Proxy endpoint the consumer posts to.
    pub endpoint: String,
    /// Sent as `Authorization: Bearer` when set.
    pub anon_key: Option<String>,
    pub idle_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/ai-assist".to_string(),
            anon_key: None,
            idle_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub chunk_delay_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { chunk_delay_ms: 50 }
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Apply `AI_GATEWAY_*` and `PORT` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("AI_GATEWAY_URL") {
            self.gateway.url = Some(url);
        }
        if let Ok(key) = std::env::var("AI_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("AI_GATEWAY_MODEL") {
            self.gateway.model = Some(model);
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_optional(dir.path().join("nope.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[gateway]
url = "https://gw.example/v1/chat/completions"
api_key = "gw-key"

[providers.openai]
model = "gpt-4o"
"#,
        )
        .unwrap();

        let cfg = Config::load_optional(&path).unwrap().unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.upstream_idle_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.server.max_body_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.providers.openai.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cfg.providers.openai.url, None);
        assert_eq!(cfg.providers.anthropic_max_tokens, 4096);
        assert_eq!(cfg.fallback.chunk_delay_ms, 50);
        assert_eq!(
            cfg.gateway.active(),
            Some(("https://gw.example/v1/chat/completions", "gw-key"))
        );
    }

    #[test]
    fn gateway_needs_url_and_key() {
        let mut gw = GatewayConfig {
            url: Some("https://gw".into()),
            api_key: Some("  ".into()),
            model: None,
        };
        assert_eq!(gw.active(), None);
        gw.api_key = Some("k".into());
        assert_eq!(gw.active(), Some(("https://gw", "k")));
        gw.url = None;
        assert_eq!(gw.active(), None);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server = [").unwrap();
        let err = Config::load_optional(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse TOML"));
    }
}
