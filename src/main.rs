use ai_assist::{app, cli};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let cfg = app::load_config(args.config.as_deref())?;

    match args.cmd {
        cli::Command::Serve { host, port } => app::cmd_serve(cfg, host, port).await,
        cli::Command::Chat {
            endpoint,
            language,
            code,
            prompt,
        } => {
            let session = app::build_session(&cfg, endpoint, language, code.as_deref())?;
            app::cmd_chat(session, prompt.join(" ")).await
        }
        cli::Command::Keys { cmd } => app::cmd_keys(&app::credential_store()?, cmd),
        #[cfg(feature = "tui")]
        cli::Command::Tui {
            endpoint,
            language,
            code,
        } => {
            let session = app::build_session(&cfg, endpoint, language, code.as_deref())?;
            ai_assist::tui::run_tui(std::sync::Arc::new(session)).await
        }
    }
}
