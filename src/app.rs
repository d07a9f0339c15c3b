use crate::codeblock;
use crate::config::Config;
use crate::consumer::{ChatSession, ClientSettings, SessionEvent, TurnStatus};
use crate::credentials::{CredentialSource, CredentialStore};
use crate::provider::{self, ProviderKind};
use crate::{cli, paths, server};
use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => paths::config_path()?,
    };
    let cfg = Config::load_optional(&path)?.unwrap_or_default();
    tracing::debug!(path = %path.display(), "resolved config");
    Ok(cfg.with_env_overrides())
}

pub async fn cmd_serve(mut cfg: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        cfg.server.host = host;
    }
    if let Some(port) = port {
        cfg.server.port = port;
    }
    server::serve(&cfg).await
}

pub fn credential_store() -> anyhow::Result<CredentialStore> {
    Ok(CredentialStore::new(paths::credentials_path()?).with_env_overrides(true))
}

pub fn build_session(
    cfg: &Config,
    endpoint: Option<String>,
    language: String,
    code_path: Option<&Path>,
) -> anyhow::Result<ChatSession> {
    let mut client = cfg.client.clone();
    if let Some(endpoint) = endpoint {
        client.endpoint = endpoint;
    }
    let settings = ClientSettings::from_config(&client)?;

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let code = match code_path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read code file: {}", p.display()))?,
        None => String::new(),
    };

    let session = ChatSession::new(http, settings, Arc::new(credential_store()?));
    session.set_context(code, language);
    Ok(session)
}

pub async fn cmd_chat(session: ChatSession, prompt: String) -> anyhow::Result<()> {
    if !prompt.trim().is_empty() {
        return run_turn(&session, &prompt).await;
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        run_turn(&session, &line).await?;
    }
    Ok(())
}

async fn run_turn(session: &ChatSession, text: &str) -> anyhow::Result<()> {
    let mut rx = session.subscribe();
    let (outcome, ()) = tokio::join!(session.send_turn(text), print_updates(&mut rx));

    let Some(outcome) = outcome else {
        return Ok(());
    };
    match outcome.status {
        TurnStatus::Completed => {
            if let Some(block) = codeblock::first_code_block(&outcome.content) {
                let lang = block.language.as_deref().unwrap_or("text");
                eprintln!("--- extracted {lang} code block ({} lines) ---", block.code.lines().count());
            }
            Ok(())
        }
        TurnStatus::Failed(reason) => anyhow::bail!("turn failed: {reason}"),
    }
}

/// Echo reply text as it grows, until the turn ends.
async fn print_updates(rx: &mut broadcast::Receiver<SessionEvent>) {
    let mut out = std::io::stdout();
    let mut printed = 0;
    loop {
        match rx.recv().await {
            Ok(SessionEvent::TurnStarted { .. }) => printed = 0,
            Ok(SessionEvent::Delta { content, .. }) => {
                print!("{}", &content[printed..]);
                out.flush().ok();
                printed = content.len();
            }
            Ok(SessionEvent::TurnCompleted { .. }) => {
                println!();
                return;
            }
            Ok(SessionEvent::TurnFailed { description, .. }) => {
                if printed > 0 {
                    println!();
                }
                eprintln!("error: {description}");
                return;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "update receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

pub fn cmd_keys(store: &CredentialStore, cmd: cli::KeysCommand) -> anyhow::Result<()> {
    let mut creds = store.read()?;
    match cmd {
        cli::KeysCommand::List => {
            let providers = store.load()?;
            for kind in ProviderKind::PRIORITY {
                let state = if providers.key(kind).is_some() {
                    "configured"
                } else if creds.has_key(kind) {
                    "disabled"
                } else {
                    "-"
                };
                println!("{:<10} {state}", kind.name());
            }
            match provider::select(&providers) {
                Some((kind, _)) => println!("requests will use: {kind}"),
                None => println!("requests will use: default gateway (or built-in reply)"),
            }
            return Ok(());
        }
        cli::KeysCommand::Set { provider, key } => {
            let kind = provider.into();
            creds.set_key(kind, Some(key));
            creds.set_enabled(kind, true);
        }
        cli::KeysCommand::Remove { provider } => creds.set_key(provider.into(), None),
        cli::KeysCommand::Enable { provider } => creds.set_enabled(provider.into(), true),
        cli::KeysCommand::Disable { provider } => creds.set_enabled(provider.into(), false),
    }
    store.save(&creds)?;
    println!("Saved credentials to: {}", store.path().display());
    Ok(())
}
