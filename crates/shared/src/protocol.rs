use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{domain::SessionId, error::ErrorPayload};

/// Body of `POST <base>/chat/stream`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub message: String,
}

/// Provenance of the data behind a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default, deserialize_with = "text_or_json")]
    pub name: String,
    #[serde(default, deserialize_with = "optional_text_or_json")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_text_or_json")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl DataSource {
    /// Reads an annotation of any shape. A bare string is taken as the name;
    /// values that are neither a string nor an object yield `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::String(name) if !name.trim().is_empty() => Some(Self {
                name,
                ..Self::default()
            }),
            value @ Value::Object(_) => Self::deserialize(value).ok(),
            _ => None,
        }
    }
}

/// One event of the `/chat/stream` response, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionInfo {
        #[serde(default, deserialize_with = "text_or_json")]
        session_id: String,
        #[serde(default, deserialize_with = "lenient_count")]
        message_count: u64,
    },
    ToolCall {
        #[serde(default, deserialize_with = "text_or_json")]
        tool_name: String,
        #[serde(default)]
        tool_args: Value,
    },
    ToolOutput {
        #[serde(default, deserialize_with = "text_or_json")]
        tool_name: String,
        #[serde(default, deserialize_with = "text_or_json")]
        content: String,
        #[serde(default, deserialize_with = "lenient_data_source")]
        #[serde(skip_serializing_if = "Option::is_none")]
        data_source: Option<DataSource>,
    },
    FinalAnswer {
        #[serde(default, deserialize_with = "text_or_json")]
        content: String,
    },
    End,
    Error(ErrorPayload),
    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInfo { .. } => "session_info",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolOutput { .. } => "tool_output",
            Self::FinalAnswer { .. } => "final_answer",
            Self::End => "end",
            Self::Error(_) => "error",
            Self::Unknown => "unknown",
        }
    }
}

fn json_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accepts a JSON string as-is and keeps any other value as compact JSON text.
pub(crate) fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(json_to_text)
}

pub(crate) fn optional_text_or_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(json_to_text))
}

fn lenient_data_source<'de, D>(deserializer: D) -> Result<Option<DataSource>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(DataSource::from_json))
}

// Counts arrive as numbers, numeric strings or null.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(|value| value.as_u64().or_else(|| value.as_str()?.trim().parse().ok()))
        .unwrap_or(0))
}
