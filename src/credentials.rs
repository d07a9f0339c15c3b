//! Provider credentials as a small key-value store.
//!
//! The file holds `<provider>_api_key` and `<provider>_enabled` entries. The
//! consumer reloads it before every send; nothing here is cached.

use crate::protocol::{ProviderCredential, Providers};
use crate::provider::ProviderKind;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the consumer gets credentials from, re-read on each send.
pub trait CredentialSource: Send + Sync {
    fn load(&self) -> anyhow::Result<Providers>;
}

/// Fixed credentials, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Providers);

impl CredentialSource for StaticCredentials {
    fn load(&self) -> anyhow::Result<Providers> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepseek_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepseek_enabled: Option<bool>,
}

impl StoredCredentials {
    fn slot_mut(&mut self, kind: ProviderKind) -> (&mut Option<String>, &mut Option<bool>) {
        match kind {
            ProviderKind::OpenAi => (&mut self.openai_api_key, &mut self.openai_enabled),
            ProviderKind::Anthropic => (&mut self.anthropic_api_key, &mut self.anthropic_enabled),
            ProviderKind::Gemini => (&mut self.gemini_api_key, &mut self.gemini_enabled),
            ProviderKind::DeepSeek => (&mut self.deepseek_api_key, &mut self.deepseek_enabled),
        }
    }

    fn slot(&self, kind: ProviderKind) -> (Option<&str>, Option<bool>) {
        match kind {
            ProviderKind::OpenAi => (self.openai_api_key.as_deref(), self.openai_enabled),
            ProviderKind::Anthropic => (self.anthropic_api_key.as_deref(), self.anthropic_enabled),
            ProviderKind::Gemini => (self.gemini_api_key.as_deref(), self.gemini_enabled),
            ProviderKind::DeepSeek => (self.deepseek_api_key.as_deref(), self.deepseek_enabled),
        }
    }

    /// Store `key`; an empty key removes the entry.
    pub fn set_key(&mut self, kind: ProviderKind, key: Option<String>) {
        let (slot, _) = self.slot_mut(kind);
        *slot = key.filter(|k| !k.trim().is_empty());
    }

    pub fn set_enabled(&mut self, kind: ProviderKind, enabled: bool) {
        let (_, slot) = self.slot_mut(kind);
        *slot = Some(enabled);
    }

    pub fn has_key(&self, kind: ProviderKind) -> bool {
        let (key, _) = self.slot(kind);
        key.is_some_and(|k| !k.trim().is_empty())
    }

    /// A provider is sent only when it has a non-empty key and is not
    /// explicitly disabled. A missing `_enabled` entry counts as enabled.
    pub fn is_active(&self, kind: ProviderKind) -> bool {
        let (_, enabled) = self.slot(kind);
        self.has_key(kind) && enabled.unwrap_or(true)
    }

    pub fn to_providers(&self) -> Providers {
        let mut out = Providers::default();
        for kind in ProviderKind::PRIORITY {
            if self.is_active(kind) {
                let (key, _) = self.slot(kind);
                out.set(kind, key.map(ProviderCredential::new));
            }
        }
        out
    }
}

/// File-backed credentials (`credentials.toml`).
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    env_overrides: bool,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_overrides: false,
        }
    }

    /// Let `<PROVIDER>_API_KEY` environment variables replace stored keys.
    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store; a missing file is an empty store.
    pub fn read(&self) -> anyhow::Result<StoredCredentials> {
        let path = &self.path;
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredCredentials::default())
            }
            Err(e) => {
                return Err(anyhow!(e))
                    .with_context(|| format!("failed to read credentials: {}", path.display()))
            }
        };
        toml::from_str(&text)
            .with_context(|| format!("failed to parse credentials: {}", path.display()))
    }

    pub fn save(&self, creds: &StoredCredentials) -> anyhow::Result<()> {
        let path = &self.path;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create credentials directory: {}", dir.display()))?;

        let tmp = tmp_path(path);
        let text = toml::to_string_pretty(creds).context("failed to serialize credentials")?;
        std::fs::write(&tmp, text)
            .with_context(|| format!("failed to write temp credentials: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move credentials into place: {}", path.display()))?;
        Ok(())
    }
}

impl CredentialSource for CredentialStore {
    fn load(&self) -> anyhow::Result<Providers> {
        let mut creds = self.read()?;
        if self.env_overrides {
            for kind in ProviderKind::PRIORITY {
                let var = format!("{}_API_KEY", kind.name().to_uppercase());
                if let Ok(key) = std::env::var(&var) {
                    creds.set_key(kind, Some(key));
                }
            }
        }
        Ok(creds.to_providers())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "credentials.toml".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_store_has_no_providers() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.toml"));
        assert_eq!(store.load().unwrap(), Providers::default());
    }

    #[test]
    fn reads_flat_keys_and_enabled_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        std::fs::write(
            &path,
            r#"
openai_api_key = "sk-1"
openai_enabled = false
anthropic_api_key = "ak-1"
gemini_api_key = ""
gemini_enabled = true
deepseek_api_key = "ds-1"
deepseek_enabled = true
"#,
        )
        .unwrap();

        let providers = CredentialStore::new(&path).load().unwrap();
        assert_eq!(providers.key(ProviderKind::OpenAi), None);
        assert_eq!(providers.key(ProviderKind::Anthropic), Some("ak-1"));
        assert_eq!(providers.key(ProviderKind::Gemini), None);
        assert_eq!(providers.key(ProviderKind::DeepSeek), Some("ds-1"));
    }

    #[test]
    fn save_then_reload_reflects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("state").join("credentials.toml"));

        let mut creds = store.read().unwrap();
        creds.set_key(ProviderKind::Gemini, Some("g-1".into()));
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap().key(ProviderKind::Gemini), Some("g-1"));

        creds.set_enabled(ProviderKind::Gemini, false);
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap().key(ProviderKind::Gemini), None);

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("gemini_api_key"));
        assert!(text.contains("gemini_enabled = false"));
    }

    #[test]
    fn static_source_returns_its_providers() {
        let mut p = Providers::default();
        p.set(ProviderKind::OpenAi, Some(ProviderCredential::new("k")));
        assert_eq!(StaticCredentials(p.clone()).load().unwrap(), p);
    }
}
