use serde_json::Value;
use shared::{
    domain::{ConnectionStatus, MessageId, SessionId},
    protocol::DataSource,
};

/// Client-side state of one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub messages: Vec<Message>,
    pub status: ConnectionStatus,
    pub loading: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(SessionId::generate())
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            status: ConnectionStatus::Connecting,
            loading: false,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub(crate) fn push(&mut self, kind: MessageKind) -> &Message {
        self.messages.push(Message::new(kind));
        &self.messages[self.messages.len() - 1]
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
        }
    }

    /// True for everything except the user's own messages.
    pub fn is_bot(&self) -> bool {
        !matches!(self.kind, MessageKind::UserText { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    UserText { text: String },
    BotText { text: String },
    ToolCall { name: String, args: Value },
    ToolOutput(ToolOutput),
    SessionInfo { session_id: String, message_count: u64 },
    Error { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub name: String,
    pub content: String,
    pub data_source: Option<DataSource>,
}

impl ToolOutput {
    /// The raw content parsed as JSON, when it is JSON.
    pub fn parsed_content(&self) -> Option<Value> {
        serde_json::from_str(&self.content).ok()
    }

    /// Declarative chart specification embedded in the content under `chart`.
    pub fn chart(&self) -> Option<Value> {
        let mut parsed = self.parsed_content()?;
        match parsed.get_mut("chart").map(Value::take) {
            Some(Value::Null) | None => None,
            Some(chart) => Some(chart),
        }
    }

    /// The outer `data_source` of the event wins over one embedded in the
    /// JSON content.
    pub fn effective_data_source(&self) -> Option<DataSource> {
        if let Some(outer) = &self.data_source {
            return Some(outer.clone());
        }
        let mut parsed = self.parsed_content()?;
        parsed
            .get_mut("data_source")
            .map(Value::take)
            .and_then(DataSource::from_json)
    }
}
