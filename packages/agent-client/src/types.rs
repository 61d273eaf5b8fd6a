//! Data model for conversations, messages, tool traces, and ask requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum byte length of a conversation title derived from a question.
const TITLE_MAX_BYTES: usize = 80;

// =============================================================================
// Conversation & Message
// =============================================================================

/// A persisted conversation between the operator and the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Opaque conversation id.
    pub id: String,

    /// Owning dashboard session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Title derived from the first question.
    pub title: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Refreshed on every appended message; used as the pagination cursor.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation titled after its first question.
    pub fn titled(id: impl Into<String>, question: &str, session_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            session_id,
            title: derive_title(question),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
///
/// Assistant messages start with a client-generated provisional id and empty
/// content; the id is reconciled with the server-issued one when the owning
/// stream completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Names of tools the agent invoked while producing this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<String>>,

    /// Number of reasoning rounds the agent spent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_rounds: Option<u32>,

    /// Token usage for the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatMessage {
    /// Create a user message with a provisional id.
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: provisional_id(),
            conversation_id: conversation_id.into(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            tools_used: None,
            tool_rounds: None,
            usage: None,
        }
    }

    /// Create an empty assistant message with a provisional id.
    pub fn assistant(conversation_id: impl Into<String>) -> Self {
        Self {
            id: provisional_id(),
            conversation_id: conversation_id.into(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            tools_used: None,
            tool_rounds: None,
            usage: None,
        }
    }
}

/// Token usage statistics reported by the answering process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// =============================================================================
// Tool traces
// =============================================================================

/// Record of one tool invocation, keyed by the correlation id issued by the
/// answering process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolTrace {
    /// Correlation id from the `tool_call` event.
    pub id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub result: Option<serde_json::Value>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolTrace {
    /// Open a trace for a `tool_call` event.
    pub fn open(id: impl Into<String>, tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            args,
            result: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Attach the tool result. Applies at most once: returns `false` if the
    /// trace already has a result.
    pub fn finish(&mut self, result: serde_json::Value) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        true
    }
}

// =============================================================================
// Ask request
// =============================================================================

/// Outbound request opening one streamed answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    /// The operator's free-form question.
    pub question: String,

    /// Continue an existing conversation; omitted on first question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Owning dashboard session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Tools the agent may invoke.
    pub enabled_tools: Vec<String>,

    /// Cap on reasoning rounds.
    pub max_tool_rounds: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl AskRequest {
    /// Create a request with default tool settings.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            conversation_id: None,
            session_id: None,
            enabled_tools: vec!["rag_search".to_string(), "structured_query".to_string()],
            max_tool_rounds: 5,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Continue an existing conversation.
    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Attach the owning dashboard session.
    pub fn session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Replace the enabled tool set.
    pub fn tools(mut self, tools: Vec<String>) -> Self {
        self.enabled_tools = tools;
        self
    }

    /// Set the reasoning-round cap.
    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set max completion tokens.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// There may be more items beyond this page.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page, deriving `has_more` from a full page being returned.
    pub fn from_items(items: Vec<T>, limit: usize) -> Self {
        let has_more = items.len() >= limit;
        Self { items, has_more }
    }
}

// =============================================================================
// Utilities
// =============================================================================

/// Generate a client-side provisional id.
pub fn provisional_id() -> String {
    Uuid::new_v4().to_string()
}

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Derive a conversation title from the first question.
pub fn derive_title(question: &str) -> String {
    truncate_to_char_boundary(question.trim(), TITLE_MAX_BYTES)
        .trim_end()
        .to_string()
}
