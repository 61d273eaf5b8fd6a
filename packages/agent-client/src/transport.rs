//! Transport seam between the stream session and the outside world.
//!
//! The session only ever sees a byte stream, so the state machine can be
//! exercised on synthetic byte sequences without a real connection.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;

use crate::error::{AgentError, Result};
use crate::types::AskRequest;

/// The response body of one open answer stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens one outbound request per question and hands back the raw body.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open the answer stream. A non-success response is a hard failure,
    /// surfaced as an error before any frame is produced.
    async fn open(&self, request: &AskRequest) -> Result<ByteStream>;
}

/// Extract a server error message from a non-success response body, falling
/// back to the raw body (or a generic message) when it is not the expected
/// `{"error": "..."}` shape.
pub(crate) fn error_from_body(status: reqwest::StatusCode, body: &str) -> AgentError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("agent stream request failed with status {}", status)
            } else {
                body.trim().to_string()
            }
        });
    AgentError::Api(message)
}
