use crate::provider::ProviderKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// AI assist: streaming multi-provider proxy and chat client
#[derive(Debug, Parser)]
#[command(name = "ai-assist")]
#[command(version)]
#[command(about = "Streaming multi-provider AI assist proxy and chat client", long_about = None)]
pub struct Args {
    /// Config file (default: <config dir>/config.toml)
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the streaming proxy
    Serve {
        /// Bind address (default: config server.host)
        #[arg(long = "host")]
        host: Option<String>,

        /// Port (default: config server.port or $PORT)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },

    /// Send chat turns to the proxy and print the streamed replies
    Chat {
        /// Proxy endpoint (default: config client.endpoint)
        #[arg(long = "endpoint")]
        endpoint: Option<String>,

        /// Language of the code context
        #[arg(short = 'l', long = "language", default_value = "html")]
        language: String,

        /// File whose contents are sent as the code context
        #[arg(long = "code", value_name = "FILE")]
        code: Option<PathBuf>,

        /// Prompt text; reads turns from stdin when omitted
        #[arg(value_name = "PROMPT")]
        prompt: Vec<String>,
    },

    /// Manage stored provider credentials
    Keys {
        #[command(subcommand)]
        cmd: KeysCommand,
    },

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui {
        /// Proxy endpoint (default: config client.endpoint)
        #[arg(long = "endpoint")]
        endpoint: Option<String>,

        /// Language of the code context
        #[arg(short = 'l', long = "language", default_value = "html")]
        language: String,

        /// File whose contents are sent as the code context
        #[arg(long = "code", value_name = "FILE")]
        code: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum KeysCommand {
    /// Show which providers are configured and which one would be used
    List,
    /// Store an API key (enables the provider)
    Set { provider: ProviderArg, key: String },
    /// Remove a stored API key
    Remove { provider: ProviderArg },
    /// Enable a provider
    Enable { provider: ProviderArg },
    /// Disable a provider without removing its key
    Disable { provider: ProviderArg },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    Openai,
    Anthropic,
    Gemini,
    Deepseek,
}

impl From<ProviderArg> for ProviderKind {
    fn from(p: ProviderArg) -> Self {
        match p {
            ProviderArg::Openai => ProviderKind::OpenAi,
            ProviderArg::Anthropic => ProviderKind::Anthropic,
            ProviderArg::Gemini => ProviderKind::Gemini,
            ProviderArg::Deepseek => ProviderKind::DeepSeek,
        }
    }
}
