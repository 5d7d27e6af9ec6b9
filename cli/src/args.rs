use clap::Parser;
use std::path::PathBuf;

/// chat-tail - follow a chat or notification topic from the terminal
#[derive(Parser, Debug)]
#[command(name = "chat-tail")]
#[command(version)]
#[command(about = "Tail a chat-link topic and post messages to it", long_about = None)]
pub struct Cli {
    /// Backend base URL (e.g., http://localhost:8080)
    #[arg(short = 'u', long = "url")]
    pub url: Option<String>,

    /// JWT authentication token
    #[arg(long = "token")]
    pub token: Option<String>,

    /// Topic to follow: chat:<id> or user:<id>:notifications
    #[arg(short = 't', long = "topic")]
    pub topic: String,

    /// Items requested per history page
    #[arg(long = "page-size")]
    pub page_size: Option<u32>,

    /// Configuration file path
    #[arg(long = "config", default_value = "~/.chat-link/config.toml")]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Use short timeouts (local development)
    #[arg(long = "fast-timeouts", conflicts_with = "relaxed_timeouts")]
    pub fast_timeouts: bool,

    /// Use long timeouts (slow or distant backends)
    #[arg(long = "relaxed-timeouts")]
    pub relaxed_timeouts: bool,
}
