use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::optional_text_or_json;

/// Error code attached to an `error` event. Backends usually send a symbolic
/// string or a numeric status; anything else is kept as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Text(String),
    Number(serde_json::Number),
    Other(serde_json::Value),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => number.fmt(f),
            Self::Other(value) => value.fmt(f),
        }
    }
}

/// Payload of an `error` event as reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Error)]
#[error("{}", describe(.message, .content))]
pub struct ErrorPayload {
    #[serde(default, deserialize_with = "optional_text_or_json")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "optional_text_or_json")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            content: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// `message`, falling back to `content`; empty strings count as absent.
    pub fn detail(&self) -> &str {
        describe(&self.message, &self.content)
    }

    /// Markdown text shown to the user for this error.
    pub fn display_text(&self) -> String {
        match &self.code {
            Some(code) => format!("**Error**: {}\n\n**Error Code**: {code}", self.detail()),
            None => format!("**Error**: {}", self.detail()),
        }
    }
}

fn describe<'a>(message: &'a Option<String>, content: &'a Option<String>) -> &'a str {
    [message, content]
        .into_iter()
        .filter_map(|value| value.as_deref())
        .find(|value| !value.is_empty())
        .unwrap_or("unknown error")
}
