//! Streaming client for the dashboard agent.
//!
//! The dashboard backend answers free-form operator questions with a
//! tool-using AI process. Answers arrive as a server-driven SSE stream of
//! typed events (tokens, tool calls, tool results, a terminal `done` or
//! `error`); this crate decodes that stream, folds it into conversation
//! state, and pages through persisted history.
//!
//! # Asking a question
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agent_client::{AgentClient, AskRequest, MemoryHistory, SessionSupervisor, SessionUpdate};
//!
//! let client = Arc::new(AgentClient::from_env()?);
//! let history = Arc::new(MemoryHistory::new());
//! let mut supervisor = SessionSupervisor::new(client.clone(), history);
//!
//! let mut handle = supervisor.ask(AskRequest::new("What changed this week?")).await;
//! while let Some(update) = handle.updates.recv().await {
//!     match update {
//!         SessionUpdate::Event(event) => render(event),
//!         SessionUpdate::Finished(state) => break,
//!     }
//! }
//! ```
//!
//! # Paging history
//!
//! ```rust,ignore
//! let page = client.list_conversations(None, None, 25).await?;
//! let older = client.list_conversations(None, page.items.last().map(|c| c.updated_at), 25).await?;
//! ```

pub mod assembler;
pub mod error;
pub mod events;
pub mod history;
pub mod session;
pub mod sse;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use assembler::{Outcome, Transcript};
pub use error::{AgentError, Result};
pub use events::StreamEvent;
pub use history::{HistoryStore, MemoryHistory};
pub use session::{SessionState, SessionUpdate, StreamSession};
pub use sse::{Frame, FrameStream};
pub use supervisor::{SessionHandle, SessionSupervisor};
pub use transport::{ByteStream, StreamTransport};
pub use types::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

/// HTTP client for the dashboard agent endpoints.
#[derive(Clone)]
pub struct AgentClient {
    http_client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl AgentClient {
    /// Create a client for the given dashboard base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token: None,
        }
    }

    /// Create from environment: `AGENT_DASHBOARD_URL` (required) and
    /// `AGENT_API_TOKEN` (optional).
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("AGENT_DASHBOARD_URL")
            .map_err(|_| AgentError::Config("AGENT_DASHBOARD_URL not set".into()))?;
        let mut client = Self::new(base_url);
        client.api_token = std::env::var("AGENT_API_TOKEN").ok();
        Ok(client)
    }

    /// Set a bearer token for authenticated deployments.
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Page of conversations ordered by `updated_at` descending, strictly
    /// older than `before` if given.
    pub async fn list_conversations(
        &self,
        session_id: Option<&str>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Page<Conversation>> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(session) = session_id {
            query.push(("sessionId", session.to_string()));
        }
        if let Some(cursor) = before {
            query.push(("before", cursor.timestamp_millis().to_string()));
        }

        let items: Vec<Conversation> = self
            .get_json(&format!("{}/api/agent/conversations", self.base_url), &query)
            .await?;
        Ok(Page::from_items(items, limit))
    }

    /// Page of messages for one conversation: the `limit` most recent
    /// strictly older than `before`, in ascending timestamp order.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Page<ChatMessage>> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = before {
            query.push(("before", cursor.timestamp_millis().to_string()));
        }

        let items: Vec<ChatMessage> = self
            .get_json(
                &format!(
                    "{}/api/agent/conversations/{}/messages",
                    self.base_url, conversation_id
                ),
                &query,
            )
            .await?;
        Ok(Page::from_items(items, limit))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .request(self.http_client.get(url).query(query))
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "history request failed");
                AgentError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "history endpoint returned an error");
            return Err(transport::error_from_body(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))
    }
}

#[async_trait]
impl StreamTransport for AgentClient {
    /// Open the answer stream: one POST carrying the question and stream
    /// parameters, whose body is an indefinite-length SSE stream.
    async fn open(&self, request: &AskRequest) -> Result<ByteStream> {
        use reqwest::header;

        debug!(
            conversation_id = ?request.conversation_id,
            tools = ?request.enabled_tools,
            "opening agent stream request"
        );

        let response = self
            .request(
                self.http_client
                    .post(format!("{}/api/agent/stream", self.base_url))
                    .header(header::ACCEPT, "text/event-stream")
                    .json(request),
            )
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "agent stream request failed");
                AgentError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "agent stream endpoint rejected the request");
            return Err(transport::error_from_body(status, &body));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| AgentError::Network(e.to_string())));
        Ok(Box::pin(bytes))
    }
}
