use super::*;
use crate::transport::API_KEY_HEADER;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::stream;
use std::convert::Infallible;
use tokio::net::TcpListener;

const BASE_URL: &str = "http://backend.test";

const FULL_TURN: &[&str] = &[
    "data: {\"type\":\"session_info\",\"session_id\":\"srv-1\",\"message_count\":1}\n\n",
    "data: {\"type\":\"tool_call\",\"tool_name\":\"search_dataset\",\"tool_args\":{\"q\":\"flood\"}}\n\ndata: {\"type\":\"tool_out",
    "put\",\"tool_name\":\"search_dataset\",\"content\":\"3 datasets\"}\n\n",
    "data: {\"type\":\"final_answer\",\"content\":\"Three datasets mention floods.\"}\n\n",
    "data: {\"type\":\"end\"}\n\n",
];

enum Script {
    Chunks(Vec<Vec<u8>>),
    ChunksThenReadError(Vec<Vec<u8>>),
    Refuse(StatusCode),
    NoBody,
}

struct ScriptedTransport {
    script: Script,
    requests: std::sync::Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn chunks(chunks: &[&str]) -> Arc<Self> {
        Self::new(Script::Chunks(
            chunks.iter().map(|chunk| chunk.as_bytes().to_vec()).collect(),
        ))
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn chunk_stream(chunks: &[Vec<u8>], tail: Option<TransportError>) -> ChunkStream {
    let mut items: Vec<Result<Bytes, TransportError>> = chunks
        .iter()
        .map(|chunk| Ok(Bytes::from(chunk.clone())))
        .collect();
    if let Some(err) = tail {
        items.push(Err(err));
    }
    stream::iter(items).boxed()
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        match &self.script {
            Script::Chunks(chunks) => Ok(chunk_stream(chunks, None)),
            Script::ChunksThenReadError(chunks) => Ok(chunk_stream(
                chunks,
                Some(TransportError::Read("connection reset by peer".to_string())),
            )),
            Script::Refuse(status) => Err(TransportError::Status(*status)),
            Script::NoBody => Err(TransportError::MissingBody),
        }
    }

    fn base_url(&self) -> &str {
        BASE_URL
    }
}

fn kinds(session: &Session) -> Vec<&MessageKind> {
    session.messages.iter().map(|message| &message.kind).collect()
}

#[tokio::test]
async fn new_session_is_connected_with_greeting() {
    let controller = ChatController::new(ScriptedTransport::chunks(&[]), "Hello there");
    let session = controller.snapshot().await;

    assert_eq!(session.status, ConnectionStatus::Connected);
    assert!(!session.loading);
    assert_eq!(
        kinds(&session),
        vec![&MessageKind::BotText {
            text: "Hello there".to_string()
        }]
    );
}

#[tokio::test]
async fn full_turn_applies_events_in_arrival_order() {
    let transport = ScriptedTransport::chunks(FULL_TURN);
    let controller = ChatController::new(transport.clone(), "greeting");

    let outcome = controller.submit("Any flood data?").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Connected));

    let session = controller.snapshot().await;
    assert_eq!(session.messages.len(), 6);
    assert_eq!(
        session.messages[1].kind,
        MessageKind::UserText {
            text: "Any flood data?".to_string()
        }
    );
    assert!(matches!(
        session.messages[2].kind,
        MessageKind::SessionInfo { .. }
    ));
    assert!(matches!(session.messages[3].kind, MessageKind::ToolCall { .. }));
    assert!(matches!(session.messages[4].kind, MessageKind::ToolOutput(_)));
    assert_eq!(
        session.messages[5].kind,
        MessageKind::BotText {
            text: "Three datasets mention floods.".to_string()
        }
    );
    assert_eq!(session.status, ConnectionStatus::Connected);
    assert!(!session.loading);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_id, session.id);
    assert_eq!(requests[0].message, "Any flood data?");
}

#[tokio::test]
async fn final_answer_split_at_any_offset_yields_one_bot_message() {
    let frame = "data: {\"type\":\"final_answer\",\"content\":\"Hi\"}\n\n";
    for offset in 1..frame.len() {
        let (head, tail) = frame.split_at(offset);
        let transport = ScriptedTransport::chunks(&[head, tail]);
        let controller = ChatController::new(transport, "greeting");

        controller.submit("hello").await;

        let session = controller.snapshot().await;
        assert_eq!(session.messages.len(), 3, "split at byte {offset}");
        assert_eq!(
            session.messages[2].kind,
            MessageKind::BotText {
                text: "Hi".to_string()
            },
            "split at byte {offset}"
        );
    }
}

#[tokio::test]
async fn submit_while_loading_is_a_noop() {
    let transport = ScriptedTransport::chunks(FULL_TURN);
    let controller = ChatController::new(transport.clone(), "greeting");
    {
        let mut session = controller.session.lock().await;
        session.status = ConnectionStatus::Loading;
        session.loading = true;
    }
    let before = controller.snapshot().await;

    let outcome = controller.submit("second question").await;

    assert_eq!(outcome, SubmitOutcome::Rejected(Rejection::RequestInFlight));
    assert_eq!(controller.snapshot().await, before);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn blank_input_is_rejected_without_sending() {
    let transport = ScriptedTransport::chunks(FULL_TURN);
    let controller = ChatController::new(transport.clone(), "greeting");
    let before = controller.snapshot().await;

    assert_eq!(
        controller.submit("  \n\t").await,
        SubmitOutcome::Rejected(Rejection::EmptyInput)
    );
    assert_eq!(controller.snapshot().await, before);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn missing_credentials_show_error_and_block_submission() {
    let transport = ScriptedTransport::chunks(FULL_TURN);
    let controller = ChatController::without_credentials(transport.clone());

    let session = controller.snapshot().await;
    assert!(matches!(session.messages[0].kind, MessageKind::Error { .. }));
    assert!(!controller.accepts_input());
    assert_eq!(
        controller.submit("hello").await,
        SubmitOutcome::Rejected(Rejection::MissingApiKey)
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn refused_request_appends_error_and_allows_resubmission() {
    let controller = ChatController::new(
        ScriptedTransport::new(Script::Refuse(StatusCode::BAD_GATEWAY)),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Error));

    let session = controller.snapshot().await;
    assert_eq!(session.messages.len(), 3);
    let MessageKind::Error { text } = &session.messages[2].kind else {
        panic!("expected error message");
    };
    assert!(text.contains(BASE_URL), "{text}");
    assert!(!session.loading);

    assert_eq!(
        controller.submit("hello again").await,
        SubmitOutcome::Completed(ConnectionStatus::Error)
    );
    assert_eq!(controller.snapshot().await.messages.len(), 5);
}

#[tokio::test]
async fn missing_body_is_a_transport_failure() {
    let controller = ChatController::new(ScriptedTransport::new(Script::NoBody), "greeting");

    controller.submit("hello").await;

    let session = controller.snapshot().await;
    assert_eq!(session.status, ConnectionStatus::Error);
    assert!(matches!(
        session.last_message().map(|message| &message.kind),
        Some(MessageKind::Error { .. })
    ));
}

#[tokio::test]
async fn read_error_mid_stream_keeps_applied_events_and_fails_turn() {
    let controller = ChatController::new(
        ScriptedTransport::new(Script::ChunksThenReadError(vec![
            FULL_TURN[1].as_bytes().to_vec(),
        ])),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Error));

    let session = controller.snapshot().await;
    assert!(matches!(session.messages[2].kind, MessageKind::ToolCall { .. }));
    assert!(matches!(session.messages[3].kind, MessageKind::Error { .. }));
    assert_eq!(session.messages.len(), 4);
    assert!(!session.loading);
}

#[tokio::test]
async fn stream_completion_without_end_settles_connected() {
    let controller = ChatController::new(
        ScriptedTransport::chunks(&[
            "data: {\"type\":\"final_answer\",\"content\":\"done\"}\n\n",
            "data: {\"type\":\"final_answer\",\"content\":\"never finish",
        ]),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Connected));

    let session = controller.snapshot().await;
    assert_eq!(session.messages.len(), 3);
    assert!(!session.loading);
}

#[tokio::test]
async fn malformed_and_unknown_frames_do_not_abort_the_stream() {
    let controller = ChatController::new(
        ScriptedTransport::chunks(&[
            "data: {broken\n\n",
            ": keep-alive comment\n\n",
            "data: {\"type\":\"progress\",\"pct\":50}\n\n",
            "data: {\"type\":\"final_answer\",\"content\":\"still here\"}\n\n",
            "data: {\"type\":\"end\"}\n\n",
        ]),
        "greeting",
    );

    controller.submit("hello").await;

    let session = controller.snapshot().await;
    assert_eq!(session.messages.len(), 3);
    assert_eq!(
        session.messages[2].kind,
        MessageKind::BotText {
            text: "still here".to_string()
        }
    );
    assert_eq!(session.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn error_event_closes_the_turn() {
    let controller = ChatController::new(
        ScriptedTransport::chunks(&[concat!(
            "data: {\"type\":\"error\",\"message\":\"rate limited\",\"code\":\"RATE_LIMIT\"}\n\n",
            "data: {\"type\":\"final_answer\",\"content\":\"late\"}\n\n",
        )]),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Error));

    let session = controller.snapshot().await;
    assert_eq!(session.messages.len(), 3);
    let MessageKind::Error { text } = &session.messages[2].kind else {
        panic!("expected error message");
    };
    assert!(text.contains("rate limited"), "{text}");
    assert!(text.contains("RATE_LIMIT"), "{text}");
    assert!(!session.loading);
}

#[tokio::test]
async fn error_event_with_structured_code_fails_the_turn() {
    let controller = ChatController::new(
        ScriptedTransport::chunks(&[
            "data: {\"type\":\"error\",\"message\":\"quota exceeded\",\"code\":{\"http\":429}}\n\n",
        ]),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Error));

    let session = controller.snapshot().await;
    let MessageKind::Error { text } = &session.messages[2].kind else {
        panic!("expected error message");
    };
    assert!(text.contains("quota exceeded"), "{text}");
    assert!(text.contains("{\"http\":429}"), "{text}");
}

#[tokio::test]
async fn subscribers_observe_updates_as_they_are_applied() {
    let controller = ChatController::new(
        ScriptedTransport::chunks(&[
            "data: {\"type\":\"final_answer\",\"content\":\"Hi\"}\n\n",
            "data: {\"type\":\"end\"}\n\n",
        ]),
        "greeting",
    );
    let mut rx = controller.subscribe();

    controller.submit("hello").await;

    let mut observed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        observed.push(event);
    }
    assert_eq!(observed.len(), 4, "{observed:?}");
    assert!(matches!(
        &observed[0],
        SessionEvent::MessageAppended(Message {
            kind: MessageKind::UserText { .. },
            ..
        })
    ));
    assert_eq!(
        observed[1],
        SessionEvent::StatusChanged {
            status: ConnectionStatus::Loading,
            loading: true
        }
    );
    assert!(matches!(
        &observed[2],
        SessionEvent::MessageAppended(Message {
            kind: MessageKind::BotText { .. },
            ..
        })
    ));
    assert_eq!(
        observed[3],
        SessionEvent::StatusChanged {
            status: ConnectionStatus::Connected,
            loading: false
        }
    );
}

#[derive(Clone)]
struct StreamServerState {
    chunks: Arc<Vec<&'static str>>,
    received: Arc<Mutex<Vec<(Option<String>, ChatRequest)>>>,
}

async fn handle_chat_stream(
    State(state): State<StreamServerState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let authorized = api_key.as_deref() == Some("test-key");
    state.received.lock().await.push((api_key, request));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let chunks: Vec<Result<String, Infallible>> = state
        .chunks
        .iter()
        .map(|chunk| Ok(chunk.to_string()))
        .collect();
    Body::from_stream(tokio_stream::iter(chunks)).into_response()
}

async fn spawn_stream_server(
    chunks: &[&'static str],
) -> Result<(String, StreamServerState), std::io::Error> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = StreamServerState {
        chunks: Arc::new(chunks.to_vec()),
        received: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/chat/stream", post(handle_chat_stream))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

#[tokio::test]
async fn http_transport_streams_turn_from_backend() {
    let (server_url, state) = spawn_stream_server(FULL_TURN).await.expect("spawn server");
    let controller = ChatController::new(
        Arc::new(HttpTransport::new(server_url, Some("test-key".to_string()))),
        "greeting",
    );

    let outcome = controller.submit("Any flood data?").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Connected));

    let session = controller.snapshot().await;
    assert_eq!(session.messages.len(), 6);

    let received = state.received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.as_deref(), Some("test-key"));
    assert_eq!(received[0].1.session_id, session.id);
    assert_eq!(received[0].1.message, "Any flood data?");
}

#[tokio::test]
async fn http_transport_rejection_surfaces_as_error_message() {
    let (server_url, state) = spawn_stream_server(FULL_TURN).await.expect("spawn server");
    let controller = ChatController::new(
        Arc::new(HttpTransport::new(server_url, Some("wrong-key".to_string()))),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Error));

    let session = controller.snapshot().await;
    let Some(MessageKind::Error { text }) = session.last_message().map(|m| &m.kind) else {
        panic!("expected error message");
    };
    assert!(text.contains("API key"), "{text}");
    assert_eq!(state.received.lock().await.len(), 1);
}

#[tokio::test]
async fn http_transport_omits_key_header_when_unset() {
    let (server_url, state) = spawn_stream_server(FULL_TURN).await.expect("spawn server");
    let transport = Arc::new(HttpTransport::new(server_url, None));
    let controller = ChatController::new(transport, "greeting");

    controller.submit("hello").await;

    let received = state.received.lock().await;
    assert_eq!(received.len(), 1);
    assert!(received[0].0.is_none());
}

#[tokio::test]
async fn unreachable_backend_fails_the_turn() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let controller = ChatController::new(
        Arc::new(HttpTransport::new(format!("http://{addr}"), None)),
        "greeting",
    );

    let outcome = controller.submit("hello").await;
    assert_eq!(outcome, SubmitOutcome::Completed(ConnectionStatus::Error));
    assert!(!controller.snapshot().await.loading);
}

#[test]
fn settings_without_required_key_build_a_locked_session() {
    let settings = Settings::default();
    let controller = ChatController::from_settings(&settings).expect("controller");
    assert!(!controller.accepts_input());

    let settings = Settings {
        api_key: Some("k".to_string()),
        ..Settings::default()
    };
    let controller = ChatController::from_settings(&settings).expect("controller");
    assert!(controller.accepts_input());
}
