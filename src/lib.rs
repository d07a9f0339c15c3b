pub mod app;
pub mod cli;
pub mod codeblock;
pub mod config;
pub mod consumer;
pub mod credentials;
pub mod error;
pub mod paths;
pub mod prompt;
pub mod protocol;
pub mod provider;
pub mod proxy;
pub mod server;
pub mod sse;

#[cfg(feature = "tui")]
pub mod tui;
