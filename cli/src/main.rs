//! chat-tail - follow a chat or notification topic from the terminal
//!
//! # Usage
//!
//! ```bash
//! # Follow a conversation
//! chat-tail -u http://localhost:8080 --token <JWT> --topic chat:42
//!
//! # Follow a user's notifications with settings from ~/.chat-link/config.toml
//! chat-tail --topic user:7:notifications
//! ```

use clap::Parser;

use chat_link::{ChatLinkClient, ChatLinkTimeouts, EventHandlers, Topic};
use chat_tail::{logging, CLIConfiguration, CLIError, Result, TailSession};

mod args;

use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.verbose)?;

    // Flags win over the config file
    let config = CLIConfiguration::load(&cli.config)?;

    let url = cli
        .url
        .clone()
        .or_else(|| config.server_url().map(str::to_string))
        .ok_or_else(|| {
            CLIError::ConfigurationError(
                "No server URL; pass --url or set [server].url in the config file".into(),
            )
        })?;

    let topic: Topic = cli.topic.parse()?;

    let timeouts = if cli.fast_timeouts {
        ChatLinkTimeouts::fast()
    } else if cli.relaxed_timeouts {
        ChatLinkTimeouts::relaxed()
    } else {
        ChatLinkTimeouts::default()
    };

    let mut stream_options = config.to_stream_options();
    if let Some(page_size) = cli.page_size {
        stream_options = stream_options.with_page_size(page_size);
    }

    let handlers = EventHandlers::new()
        .on_connect(|| log::info!("connected"))
        .on_disconnect(|reason| log::warn!("disconnected: {}", reason))
        .on_error(|error| {
            if error.recoverable {
                log::warn!("connection error: {}", error);
            } else {
                log::error!("giving up: {}", error);
            }
        });

    let mut builder = ChatLinkClient::builder()
        .base_url(url)
        .timeouts(timeouts)
        .connection_options(config.to_connection_options())
        .stream_options(stream_options)
        .event_handlers(handlers);

    if let Some(token) = cli.token.as_deref().or(config.jwt_token()) {
        builder = builder.jwt_token(token);
    }

    let client = builder.build()?;
    let stream = client.topic_stream(topic).await?;

    let result = TailSession::new(stream).run().await;
    client.disconnect().await;
    result
}
