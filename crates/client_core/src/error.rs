use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failures that abort a turn before or while its response body is read.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chat backend responded with status {0}")]
    Status(StatusCode),
    #[error("chat backend response has no body")]
    MissingBody,
    #[error("chat request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reading the response stream failed: {0}")]
    Read(String),
}

impl TransportError {
    /// Human-readable text appended to the conversation for this failure.
    pub fn user_message(&self, base_url: &str) -> String {
        match self {
            Self::Status(status) if status.as_u16() == 401 || status.as_u16() == 403 => format!(
                "Sorry, the chat server rejected the request ({status}). Check the configured API key."
            ),
            Self::Read(_) => {
                "Sorry, the connection to the chat server was interrupted. Please resend your message."
                    .to_string()
            }
            _ => format!(
                "Sorry, the chat server could not be reached. Make sure it is running at {base_url}"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid base url '{url}': {source}")]
    BaseUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}
