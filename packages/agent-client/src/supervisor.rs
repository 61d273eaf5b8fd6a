//! Session supervisor: the sole owner of the "current stream" for one UI
//! surface.
//!
//! At most one session is live at a time. Asking a new question cancels the
//! previous session and awaits its resource release before the new request is
//! opened, so two sessions can never race on the same provisional message.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::assembler::Transcript;
use crate::history::HistoryStore;
use crate::session::{SessionState, SessionUpdate, StreamSession};
use crate::transport::StreamTransport;
use crate::types::AskRequest;

/// Subscriber-side handle to one running session.
pub struct SessionHandle {
    /// Event/terminal updates in arrival order.
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
    /// Continuously-updated transcript for rendering.
    pub transcript: Arc<RwLock<Transcript>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Request cancellation. Idempotent; the supervisor (or a later `ask`)
    /// awaits the actual resource release.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<SessionState>,
}

/// Holds at most one live session handle and is the only place allowed to
/// cancel-and-replace it.
pub struct SessionSupervisor {
    transport: Arc<dyn StreamTransport>,
    history: Arc<dyn HistoryStore>,
    active: Option<ActiveSession>,
}

impl SessionSupervisor {
    pub fn new(transport: Arc<dyn StreamTransport>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            transport,
            history,
            active: None,
        }
    }

    /// Start streaming an answer to `request`, superseding any in-flight
    /// session. Returns immediately; events arrive on the handle.
    pub async fn ask(&mut self, request: AskRequest) -> SessionHandle {
        self.cancel_active().await;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let transcript = Arc::new(RwLock::new(Transcript::begin(
            &request.question,
            request.conversation_id.clone(),
        )));

        let session = StreamSession::new(
            request,
            transcript.clone(),
            self.history.clone(),
            cancel.clone(),
            tx,
        );
        let task = tokio::spawn(session.run(self.transport.clone()));

        self.active = Some(ActiveSession {
            cancel: cancel.clone(),
            task,
        });

        SessionHandle {
            updates: rx,
            transcript,
            cancel,
        }
    }

    /// Cancel the in-flight session, if any, and await its release. Safe to
    /// call when nothing is active.
    pub async fn cancel_active(&mut self) -> Option<SessionState> {
        let active = self.active.take()?;
        active.cancel.cancel();
        match active.task.await {
            Ok(state) => {
                debug!(?state, "superseded session released");
                Some(state)
            }
            Err(_) => None,
        }
    }

    /// Whether a session is currently held (it may already have finished).
    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::history::MemoryHistory;
    use crate::transport::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;

    /// Transport that streams one token then hangs until cancelled.
    struct HangingTransport;

    #[async_trait]
    impl StreamTransport for HangingTransport {
        async fn open(&self, request: &AskRequest) -> Result<ByteStream> {
            let first = format!(
                "data: {{\"type\":\"token\",\"content\":\"answering {}\"}}\n\n",
                request.question
            );
            let head = futures::stream::iter(vec![Ok(Bytes::from(first))]);
            Ok(Box::pin(head.chain(futures::stream::pending())))
        }
    }

    fn supervisor() -> SessionSupervisor {
        SessionSupervisor::new(
            Arc::new(HangingTransport),
            Arc::new(MemoryHistory::new()) as Arc<dyn HistoryStore>,
        )
    }

    #[tokio::test]
    async fn test_new_ask_supersedes_previous_session() {
        let mut supervisor = supervisor();

        let mut first = supervisor.ask(AskRequest::new("one")).await;
        // Prove the first session is live.
        assert!(matches!(
            first.updates.recv().await,
            Some(SessionUpdate::Event(_))
        ));

        let _second = supervisor.ask(AskRequest::new("two")).await;

        // The first session was cancelled and released before the second
        // request opened.
        let mut saw_cancelled = false;
        while let Some(update) = first.updates.recv().await {
            if let SessionUpdate::Finished(state) = update {
                assert_eq!(state, SessionState::Cancelled);
                saw_cancelled = true;
            }
        }
        assert!(saw_cancelled);
        assert!(supervisor.has_active());
    }

    #[tokio::test]
    async fn test_cancel_active_is_idempotent() {
        let mut supervisor = supervisor();
        let _handle = supervisor.ask(AskRequest::new("one")).await;

        assert_eq!(
            supervisor.cancel_active().await,
            Some(SessionState::Cancelled)
        );
        assert_eq!(supervisor.cancel_active().await, None);
        assert!(!supervisor.has_active());
    }

    #[tokio::test]
    async fn test_handle_cancel_reaches_session() {
        let mut supervisor = supervisor();
        let mut handle = supervisor.ask(AskRequest::new("one")).await;

        handle.cancel();
        handle.cancel();

        let mut finished = None;
        while let Some(update) = handle.updates.recv().await {
            if let SessionUpdate::Finished(state) = update {
                finished = Some(state);
            }
        }
        assert_eq!(finished, Some(SessionState::Cancelled));
    }
}
