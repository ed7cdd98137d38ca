//! Folds server events into the conversation state.

use shared::{domain::ConnectionStatus, protocol::ServerEvent};
use tracing::{debug, warn};

use crate::types::{Message, MessageKind, Session, ToolOutput};

/// What a single event changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    pub appended: Option<Message>,
    pub status_changed: bool,
}

/// Pure reducer: applies `event` to `session` and returns the next state.
pub fn reduce(mut session: Session, event: ServerEvent) -> Session {
    apply(&mut session, event);
    session
}

/// In-place form of [`reduce`] that also reports the change.
pub fn apply(session: &mut Session, event: ServerEvent) -> Transition {
    let kind = match event {
        ServerEvent::SessionInfo {
            session_id,
            message_count,
        } => MessageKind::SessionInfo {
            session_id,
            message_count,
        },
        ServerEvent::ToolCall {
            tool_name,
            tool_args,
        } => MessageKind::ToolCall {
            name: tool_name,
            args: tool_args,
        },
        ServerEvent::ToolOutput {
            tool_name,
            content,
            data_source,
        } => MessageKind::ToolOutput(ToolOutput {
            name: tool_name,
            content,
            data_source,
        }),
        ServerEvent::FinalAnswer { content } => MessageKind::BotText { text: content },
        ServerEvent::End => {
            return Transition {
                appended: None,
                status_changed: settle(session, ConnectionStatus::Connected),
            };
        }
        ServerEvent::Error(payload) => {
            warn!(session_id = %session.id, "backend reported error: {payload}");
            let appended = session
                .push(MessageKind::Error {
                    text: payload.display_text(),
                })
                .clone();
            return Transition {
                appended: Some(appended),
                status_changed: settle(session, ConnectionStatus::Error),
            };
        }
        ServerEvent::Unknown => {
            debug!(session_id = %session.id, "ignoring event of unknown type");
            return Transition::default();
        }
    };

    Transition {
        appended: Some(session.push(kind).clone()),
        status_changed: false,
    }
}

/// Clears the loading flag and moves to `status`. Returns whether anything
/// observable changed.
pub(crate) fn settle(session: &mut Session, status: ConnectionStatus) -> bool {
    let changed = session.status != status || session.loading;
    session.status = status;
    session.loading = false;
    changed
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;
