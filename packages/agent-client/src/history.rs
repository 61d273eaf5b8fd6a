//! Cursor-paginated access to persisted conversations and messages.
//!
//! The cursor is a field value from the last-seen record, not an offset:
//! `updated_at` for conversations, `created_at` for messages. Filtering is
//! strictly-less-than the cursor, which keeps pages stable while new records
//! are appended concurrently.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{ChatMessage, Conversation, Page};

/// Read/write access to conversation history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert a conversation, or refresh `updated_at` if it already exists.
    async fn upsert_conversation(&self, conversation: Conversation) -> Result<()>;

    /// Append a message and refresh the owning conversation's `updated_at`.
    async fn append_message(&self, message: ChatMessage) -> Result<()>;

    /// Conversations ordered by `updated_at` descending, strictly older than
    /// `before` if given, optionally filtered by owning session.
    async fn list_conversations(
        &self,
        session_filter: Option<&str>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Page<Conversation>>;

    /// The `limit` most recent messages strictly older than `before`,
    /// returned in ascending timestamp order.
    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Page<ChatMessage>>;
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

/// In-memory history store holding the transcripts committed by completed
/// stream sessions. Reads are safely concurrent with active streams.
#[derive(Default)]
pub struct MemoryHistory {
    inner: RwLock<Inner>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn upsert_conversation(&self, conversation: Conversation) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.conversations.get_mut(&conversation.id) {
            Some(existing) => {
                // Title and created_at are set on first insert only.
                existing.updated_at = existing.updated_at.max(conversation.updated_at);
            }
            None => {
                inner
                    .conversations
                    .insert(conversation.id.clone(), conversation);
            }
        }
        Ok(())
    }

    async fn append_message(&self, message: ChatMessage) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) {
            conversation.updated_at = conversation.updated_at.max(message.created_at);
        }
        inner
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list_conversations(
        &self,
        session_filter: Option<&str>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Page<Conversation>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| match session_filter {
                Some(session) => c.session_id.as_deref() == Some(session),
                None => true,
            })
            .filter(|c| match before {
                Some(cursor) => c.updated_at < cursor,
                None => true,
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matching.truncate(limit);

        Ok(Page::from_items(matching, limit))
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Page<ChatMessage>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<ChatMessage> = inner
            .messages
            .get(conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| match before {
                        Some(cursor) => m.created_at < cursor,
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // The `limit` most recent matches before the cursor, in ascending
        // order. Stable sort keeps append order for equal timestamps.
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let items = matching.split_off(matching.len().saturating_sub(limit));

        Ok(Page::from_items(items, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::TimeZone;

    fn conversation_at(id: &str, session: Option<&str>, millis: i64) -> Conversation {
        let at = Utc.timestamp_millis_opt(millis).unwrap();
        Conversation {
            id: id.to_string(),
            session_id: session.map(|s| s.to_string()),
            title: format!("conversation {}", id),
            created_at: at,
            updated_at: at,
        }
    }

    fn message_at(conversation: &str, id: &str, millis: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            conversation_id: conversation.to_string(),
            role: Role::User,
            content: id.to_string(),
            created_at: Utc.timestamp_millis_opt(millis).unwrap(),
            tools_used: None,
            tool_rounds: None,
            usage: None,
        }
    }

    #[tokio::test]
    async fn test_list_conversations_orders_descending() {
        let store = MemoryHistory::new();
        for (id, at) in [("a", 100), ("b", 300), ("c", 200)] {
            store
                .upsert_conversation(conversation_at(id, None, at))
                .await
                .unwrap();
        }

        let page = store.list_conversations(None, None, 10).await.unwrap();
        let ids: Vec<&str> = page.items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_pagination_stability() {
        // C1..C10 with distinct updated_at; page before C5 must be exactly
        // the 3 most-recently-updated strictly older than C5.
        let store = MemoryHistory::new();
        for i in 1..=10 {
            store
                .upsert_conversation(conversation_at(&format!("c{}", i), None, i * 1000))
                .await
                .unwrap();
        }

        let cursor = Utc.timestamp_millis_opt(5000).unwrap();
        let page = store.list_conversations(None, Some(cursor), 3).await.unwrap();

        let ids: Vec<&str> = page.items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c4", "c3", "c2"]);
        assert!(page.has_more);
        for item in &page.items {
            assert!(item.updated_at < cursor);
        }
    }

    #[tokio::test]
    async fn test_cursor_excludes_equal_timestamp() {
        let store = MemoryHistory::new();
        store
            .upsert_conversation(conversation_at("same", None, 5000))
            .await
            .unwrap();

        let cursor = Utc.timestamp_millis_opt(5000).unwrap();
        let page = store.list_conversations(None, Some(cursor), 10).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_session_filter() {
        let store = MemoryHistory::new();
        store
            .upsert_conversation(conversation_at("a", Some("s1"), 100))
            .await
            .unwrap();
        store
            .upsert_conversation(conversation_at("b", Some("s2"), 200))
            .await
            .unwrap();
        store
            .upsert_conversation(conversation_at("c", None, 300))
            .await
            .unwrap();

        let page = store.list_conversations(Some("s1"), None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "a");
    }

    #[tokio::test]
    async fn test_list_messages_page_is_most_recent_before_cursor_ascending() {
        let store = MemoryHistory::new();
        store
            .upsert_conversation(conversation_at("c1", None, 0))
            .await
            .unwrap();
        for i in 1..=6 {
            store
                .append_message(message_at("c1", &format!("m{}", i), i * 1000))
                .await
                .unwrap();
        }

        let cursor = Utc.timestamp_millis_opt(6000).unwrap();
        let page = store.list_messages("c1", Some(cursor), 3).await.unwrap();

        let ids: Vec<&str> = page.items.iter().map(|m| m.id.as_str()).collect();
        // Most recent three strictly before m6, re-sorted ascending.
        assert_eq!(ids, ["m3", "m4", "m5"]);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_append_refreshes_conversation_cursor() {
        let store = MemoryHistory::new();
        store
            .upsert_conversation(conversation_at("c1", None, 1000))
            .await
            .unwrap();
        store
            .append_message(message_at("c1", "m1", 9000))
            .await
            .unwrap();

        let page = store.list_conversations(None, None, 10).await.unwrap();
        assert_eq!(
            page.items[0].updated_at,
            Utc.timestamp_millis_opt(9000).unwrap()
        );
    }

    #[tokio::test]
    async fn test_upsert_preserves_first_insert_fields() {
        let store = MemoryHistory::new();
        let mut first = conversation_at("c1", None, 1000);
        first.title = "original title".to_string();
        store.upsert_conversation(first).await.unwrap();

        let mut second = conversation_at("c1", None, 2000);
        second.title = "should not replace".to_string();
        store.upsert_conversation(second).await.unwrap();

        let page = store.list_conversations(None, None, 10).await.unwrap();
        assert_eq!(page.items[0].title, "original title");
        assert_eq!(
            page.items[0].updated_at,
            Utc.timestamp_millis_opt(2000).unwrap()
        );
    }

    #[tokio::test]
    async fn test_has_more_at_exact_limit() {
        let store = MemoryHistory::new();
        for i in 1..=3 {
            store
                .upsert_conversation(conversation_at(&format!("c{}", i), None, i * 1000))
                .await
                .unwrap();
        }

        // A full page implies there may be more.
        let page = store.list_conversations(None, None, 3).await.unwrap();
        assert!(page.has_more);
    }
}
