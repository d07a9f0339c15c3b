//! Config and state directories. `AI_ASSIST_HOME` puts both under one root
//! (`config/`, `state/`); otherwise the XDG variables, then `$HOME` defaults.

use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "ai-assist";

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn ensure_dir(path: PathBuf) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(&path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path)
}

/// Pick a directory without touching the filesystem.
fn pick(
    assist_home: Option<PathBuf>,
    sub: &str,
    xdg: Option<PathBuf>,
    home_rel: &Path,
) -> anyhow::Result<PathBuf> {
    if let Some(base) = assist_home {
        return Ok(base.join(sub));
    }
    if let Some(xdg) = xdg.filter(|p| p.is_absolute()) {
        return Ok(xdg.join(APP_DIR));
    }
    Ok(home_dir()?.join(home_rel).join(APP_DIR))
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    ensure_dir(pick(
        env::var_os("AI_ASSIST_HOME").map(PathBuf::from),
        "config",
        env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        Path::new(".config"),
    )?)
}

pub fn state_dir() -> anyhow::Result<PathBuf> {
    ensure_dir(pick(
        env::var_os("AI_ASSIST_HOME").map(PathBuf::from),
        "state",
        env::var_os("XDG_STATE_HOME").map(PathBuf::from),
        &Path::new(".local").join("state"),
    )?)
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn credentials_path() -> anyhow::Result<PathBuf> {
    Ok(state_dir()?.join("credentials.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assist_home_wins() {
        let dir = pick(
            Some(PathBuf::from("/opt/assist")),
            "state",
            Some(PathBuf::from("/xdg/state")),
            Path::new(".local/state"),
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/opt/assist/state"));
    }

    #[test]
    fn xdg_used_when_absolute() {
        let dir = pick(None, "config", Some(PathBuf::from("/xdg")), Path::new(".config")).unwrap();
        assert_eq!(dir, PathBuf::from("/xdg/ai-assist"));
    }

    #[test]
    fn relative_xdg_is_ignored() {
        if env::var_os("HOME").is_none() {
            return;
        }
        let dir = pick(None, "config", Some(PathBuf::from("rel")), Path::new(".config")).unwrap();
        assert!(dir.ends_with(".config/ai-assist"));
    }
}
