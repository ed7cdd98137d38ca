//! Outbound request and response-body stream for one chat turn.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use shared::protocol::ChatRequest;
use tracing::debug;

use crate::{config::Settings, error::SettingsError, error::TransportError};

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const CHAT_STREAM_PATH: &str = "/chat/stream";

/// Response body chunks in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends `request` and, on a successful response, yields its body.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;

    /// Base URL used in user-facing failure messages.
    fn base_url(&self) -> &str;
}

pub struct HttpTransport {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(SettingsError::HttpClient)?;
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let mut builder = self
            .http
            .post(format!("{}{CHAT_STREAM_PATH}", self.base_url))
            .json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        if response.content_length() == Some(0) {
            return Err(TransportError::MissingBody);
        }
        debug!(%status, session_id = %request.session_id, "chat stream opened");

        Ok(response
            .bytes_stream()
            .map_err(|err| TransportError::Read(err.to_string()))
            .boxed())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
