//! Chat session core: frame decoding, event parsing, state reduction and the
//! controller that drives one streamed request per user turn.

use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::{ConnectionStatus, SessionId},
    protocol::ChatRequest,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

pub mod config;
pub mod error;
pub mod frame;
pub mod parser;
pub mod reducer;
pub mod transport;
pub mod types;

pub use config::{load_settings, Settings};
pub use error::{SettingsError, TransportError};
pub use frame::FrameDecoder;
pub use parser::{parse_frame, try_parse_frame, FrameError};
pub use reducer::{apply, reduce, Transition};
pub use transport::{ChatTransport, ChunkStream, HttpTransport};
pub use types::{Message, MessageKind, Session, ToolOutput};

const MISSING_API_KEY_TEXT: &str =
    "Error: no API key is configured for the chat backend. Please contact the administrator.";

/// Change notifications for observers of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended(Message),
    StatusChanged {
        status: ConnectionStatus,
        loading: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyInput,
    RequestInFlight,
    MissingApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing was sent and the session is unchanged.
    Rejected(Rejection),
    /// The turn ran to completion or failure; carries the resulting status.
    Completed(ConnectionStatus),
}

/// Owns one [`Session`] and is its only mutator.
pub struct ChatController {
    transport: Arc<dyn ChatTransport>,
    session: Mutex<Session>,
    accepts_input: bool,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>, greeting: impl Into<String>) -> Arc<Self> {
        Self::open(
            transport,
            MessageKind::BotText {
                text: greeting.into(),
            },
            true,
        )
    }

    /// A session whose backend credentials are missing: it shows why and
    /// rejects every submission.
    pub fn without_credentials(transport: Arc<dyn ChatTransport>) -> Arc<Self> {
        Self::open(
            transport,
            MessageKind::Error {
                text: MISSING_API_KEY_TEXT.to_string(),
            },
            false,
        )
    }

    pub fn from_settings(settings: &Settings) -> Result<Arc<Self>, SettingsError> {
        let transport = Arc::new(HttpTransport::from_settings(settings)?);
        if settings.require_api_key && settings.api_key.is_none() {
            return Ok(Self::without_credentials(transport));
        }
        Ok(Self::new(transport, settings.greeting.clone()))
    }

    fn open(
        transport: Arc<dyn ChatTransport>,
        first_message: MessageKind,
        accepts_input: bool,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let mut session = Session::new();
        session.push(first_message);
        session.status = ConnectionStatus::Connected;
        info!(session_id = %session.id, accepts_input, "chat session opened");

        Arc::new(Self {
            transport,
            session: Mutex::new(session),
            accepts_input,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    pub async fn session_id(&self) -> SessionId {
        self.session.lock().await.id
    }

    pub fn accepts_input(&self) -> bool {
        self.accepts_input
    }

    /// Runs one turn: appends the user's text, sends it and applies the
    /// streamed reply as it arrives.
    pub async fn submit(&self, input: &str) -> SubmitOutcome {
        let request = match self.begin_turn(input).await {
            Ok(request) => request,
            Err(rejection) => {
                debug!(?rejection, "submission rejected");
                return SubmitOutcome::Rejected(rejection);
            }
        };

        match self.transport.open_stream(&request).await {
            Ok(stream) => self.consume(stream).await,
            Err(err) => self.fail_turn(err).await,
        }
    }

    async fn begin_turn(&self, input: &str) -> Result<ChatRequest, Rejection> {
        let mut session = self.session.lock().await;
        if !self.accepts_input {
            return Err(Rejection::MissingApiKey);
        }
        if input.trim().is_empty() {
            return Err(Rejection::EmptyInput);
        }
        if session.loading {
            return Err(Rejection::RequestInFlight);
        }

        let appended = session
            .push(MessageKind::UserText {
                text: input.to_string(),
            })
            .clone();
        session.status = ConnectionStatus::Loading;
        session.loading = true;
        self.publish(SessionEvent::MessageAppended(appended));
        self.publish_status(&session);

        Ok(ChatRequest {
            session_id: session.id,
            message: input.to_string(),
        })
    }

    async fn consume(&self, mut stream: ChunkStream) -> SubmitOutcome {
        let mut decoder = FrameDecoder::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return self.fail_turn(err).await,
            };

            let events: Vec<_> = decoder
                .push(&chunk)
                .iter()
                .filter_map(|frame| parse_frame(frame))
                .collect();
            if events.is_empty() {
                continue;
            }

            let mut session = self.session.lock().await;
            for event in events {
                debug!(session_id = %session.id, kind = event.kind(), "applying server event");
                let transition = reducer::apply(&mut session, event);
                if let Some(message) = transition.appended {
                    self.publish(SessionEvent::MessageAppended(message));
                }
                if transition.status_changed {
                    self.publish_status(&session);
                }
                if !session.loading {
                    // `end` or `error` closes the turn; later frames are ignored.
                    return SubmitOutcome::Completed(session.status);
                }
            }
        }

        if let Some(rest) = decoder.finish() {
            debug!(discarded_len = rest.len(), "discarding incomplete trailing frame");
        }

        let mut session = self.session.lock().await;
        if session.loading && reducer::settle(&mut session, ConnectionStatus::Connected) {
            self.publish_status(&session);
        }
        SubmitOutcome::Completed(session.status)
    }

    async fn fail_turn(&self, err: TransportError) -> SubmitOutcome {
        let mut session = self.session.lock().await;
        error!(session_id = %session.id, "chat turn failed: {err}");

        let appended = session
            .push(MessageKind::Error {
                text: err.user_message(self.transport.base_url()),
            })
            .clone();
        reducer::settle(&mut session, ConnectionStatus::Error);
        self.publish(SessionEvent::MessageAppended(appended));
        self.publish_status(&session);
        SubmitOutcome::Completed(session.status)
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn publish_status(&self, session: &Session) {
        self.publish(SessionEvent::StatusChanged {
            status: session.status,
            loading: session.loading,
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
