//! Error types for chat-tail
//!
//! Provides user-friendly error messages for common terminal failures.

use chat_link::ChatLinkError;
use std::fmt;

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CLIError>;

/// Errors that can occur in the CLI
#[derive(Debug)]
pub enum CLIError {
    /// Error from the chat-link library
    LinkError(ChatLinkError),

    /// Configuration file or flag error
    ConfigurationError(String),

    /// File or terminal I/O error
    FileError(String),

    /// Invalid input line
    ParseError(String),
}

impl CLIError {
    fn format_link_error(err: &ChatLinkError) -> String {
        match err {
            ChatLinkError::TransportError(msg) => Self::clean_nested_message(msg),
            ChatLinkError::HistoryFetchError(e) => format!("Could not load history: {}", e),
            ChatLinkError::AuthenticationError(msg) => format!("Authentication failed: {}", msg),
            ChatLinkError::ConfigurationError(msg)
            | ChatLinkError::TimeoutError(msg)
            | ChatLinkError::SerializationError(msg)
            | ChatLinkError::MalformedPayloadError(msg)
            | ChatLinkError::DuplicateSubscriptionError(msg) => msg.clone(),
            ChatLinkError::Closed(msg) => format!("Closed: {}", msg),
        }
    }

    fn clean_nested_message(message: &str) -> String {
        let mut cleaned = message.trim();
        let prefixes = ["Transport error:", "Connection failed:", "connection failed:"];

        loop {
            let mut stripped = false;
            for prefix in &prefixes {
                if let Some(rest) = cleaned.strip_prefix(prefix) {
                    cleaned = rest.trim_start();
                    stripped = true;
                    break;
                }
            }

            if !stripped {
                break;
            }
        }

        cleaned.to_string()
    }
}

impl fmt::Display for CLIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CLIError::LinkError(e) => write!(f, "{}", Self::format_link_error(e)),
            CLIError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            CLIError::FileError(msg) => write!(f, "File error: {}", msg),
            CLIError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for CLIError {}

impl From<ChatLinkError> for CLIError {
    fn from(err: ChatLinkError) -> Self {
        CLIError::LinkError(err)
    }
}

impl From<std::io::Error> for CLIError {
    fn from(err: std::io::Error) -> Self {
        CLIError::FileError(err.to_string())
    }
}

impl From<toml::de::Error> for CLIError {
    fn from(err: toml::de::Error) -> Self {
        CLIError::ConfigurationError(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CLIError::ParseError("unknown command :foo".into());
        assert_eq!(err.to_string(), "Parse error: unknown command :foo");
    }

    #[test]
    fn test_nested_transport_prefixes_are_stripped() {
        let err = CLIError::from(ChatLinkError::TransportError(
            "Connection failed: connection refused".into(),
        ));
        assert_eq!(err.to_string(), "connection refused");
    }
}
