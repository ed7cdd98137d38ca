//! Maps one frame of the event stream to a typed [`ServerEvent`].

use shared::protocol::ServerEvent;
use thiserror::Error;
use tracing::{debug, warn};

/// Marker every event frame starts with.
pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame does not start with the data prefix")]
    MissingPrefix,
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn try_parse_frame(frame: &str) -> Result<ServerEvent, FrameError> {
    let payload = frame
        .strip_prefix(DATA_PREFIX)
        .ok_or(FrameError::MissingPrefix)?;
    Ok(serde_json::from_str(payload)?)
}

/// Best-effort form of [`try_parse_frame`]: frames without the prefix are
/// skipped silently, malformed payloads are logged and skipped.
pub fn parse_frame(frame: &str) -> Option<ServerEvent> {
    match try_parse_frame(frame) {
        Ok(event) => Some(event),
        Err(FrameError::MissingPrefix) => {
            debug!(frame_len = frame.len(), "skipping frame without data prefix");
            None
        }
        Err(err @ FrameError::Malformed(_)) => {
            warn!(frame_len = frame.len(), "dropping frame: {err}");
            debug!(payload = %frame, "dropped frame payload");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/parser_tests.rs"]
mod tests;
