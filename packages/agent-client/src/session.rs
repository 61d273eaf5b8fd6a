//! Stream session: owns one in-flight streamed answer from open to terminal
//! state.
//!
//! `Opening → Streaming → {Done, Errored, Cancelled}`; terminal states are
//! absorbing. The session drives the frame decoder and event dispatch loop as
//! a single sequential consumer, folds events into the shared transcript, and
//! commits the exchange to history exactly once, on `done`.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::Transcript;
use crate::events::{parse_event, StreamEvent};
use crate::history::HistoryStore;
use crate::sse::FrameStream;
use crate::transport::StreamTransport;
use crate::types::{AskRequest, Conversation};

/// Lifecycle of one stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Errored | SessionState::Cancelled
        )
    }
}

/// Incremental updates delivered to the subscriber while a session runs.
#[derive(Debug)]
pub enum SessionUpdate {
    /// A dispatched stream event, in arrival order.
    Event(StreamEvent),
    /// The session reached its terminal state. Nothing follows this.
    Finished(SessionState),
}

/// One in-flight streamed answer.
pub struct StreamSession {
    request: AskRequest,
    transcript: Arc<RwLock<Transcript>>,
    history: Arc<dyn HistoryStore>,
    cancel: CancellationToken,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    state: SessionState,
}

impl StreamSession {
    pub fn new(
        request: AskRequest,
        transcript: Arc<RwLock<Transcript>>,
        history: Arc<dyn HistoryStore>,
        cancel: CancellationToken,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        Self {
            request,
            transcript,
            history,
            cancel,
            updates,
            state: SessionState::Opening,
        }
    }

    /// Drive the session to its terminal state.
    ///
    /// Cancellation is cooperative: it wins the race against the next read,
    /// the transport handle is dropped, and no further events are delivered.
    pub async fn run(mut self, transport: Arc<dyn StreamTransport>) -> SessionState {
        info!(
            question_len = self.request.question.len(),
            conversation_id = ?self.request.conversation_id,
            "opening agent stream"
        );

        let bytes = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return self.finish_cancelled().await;
            }
            opened = transport.open(&self.request) => match opened {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "agent stream failed to open");
                    self.transcript.write().await.mark_failed(&e.to_string());
                    return self.finish(SessionState::Errored);
                }
            }
        };

        self.state = SessionState::Streaming;
        let mut frames = FrameStream::new(bytes);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.finish_cancelled().await;
                }
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        // Undecodable frames are dropped; the stream goes on.
                        let Some(event) = parse_event(&frame) else { continue };
                        if self.handle_event(event).await {
                            // Defensive stop: no input is processed past the
                            // terminal frame, even if more bytes arrived.
                            let state = self.state;
                            return self.finish(state);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "agent stream read failed");
                        self.transcript
                            .write()
                            .await
                            .mark_failed("connection to the agent was lost");
                        return self.finish(SessionState::Errored);
                    }
                    None => {
                        warn!("agent stream ended without a terminal event");
                        self.transcript
                            .write()
                            .await
                            .mark_failed("the agent stream ended unexpectedly");
                        return self.finish(SessionState::Errored);
                    }
                }
            }
        }
    }

    /// Fold one event into the transcript and forward it to the subscriber.
    /// Returns `true` once the session is terminal.
    async fn handle_event(&mut self, event: StreamEvent) -> bool {
        match &event {
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                ..
            } => {
                info!(tool_call_id = %tool_call_id, tool = %tool_name, "agent invoked tool");
            }
            StreamEvent::ToolResult { tool_call_id, .. } => {
                debug!(tool_call_id = %tool_call_id, "tool result received");
            }
            _ => {}
        }

        self.transcript.write().await.apply(&event);

        match &event {
            StreamEvent::Done {
                tool_rounds,
                total_usage,
                ..
            } => {
                info!(
                    tool_rounds = *tool_rounds,
                    total_tokens = total_usage.as_ref().map(|u| u.total_tokens),
                    "agent stream completed"
                );
                if let Err(e) = self.commit().await {
                    warn!(error = %e, "failed to commit completed exchange to history");
                }
                self.state = SessionState::Done;
            }
            StreamEvent::Error { error, .. } => {
                warn!(error = %error, "agent reported an error mid-stream");
                self.state = SessionState::Errored;
            }
            _ => {}
        }

        // The subscriber may have gone away; that only silences updates.
        let _ = self.updates.send(SessionUpdate::Event(event));
        self.state.is_terminal()
    }

    /// Persist the finished exchange: conversation (created implicitly on
    /// first question) and both messages.
    async fn commit(&self) -> crate::error::Result<()> {
        let transcript = self.transcript.read().await;
        let conversation_id = match &transcript.conversation_id {
            Some(id) => id.clone(),
            // Unreachable in practice: `done` always carries the id.
            None => return Ok(()),
        };

        self.history
            .upsert_conversation(Conversation::titled(
                conversation_id,
                &self.request.question,
                self.request.session_id.clone(),
            ))
            .await?;
        for message in &transcript.messages {
            self.history.append_message(message.clone()).await?;
        }
        Ok(())
    }

    async fn finish_cancelled(mut self) -> SessionState {
        debug!("agent stream cancelled");
        self.transcript.write().await.mark_cancelled();
        self.state = SessionState::Cancelled;
        self.finish(SessionState::Cancelled)
    }

    fn finish(self, state: SessionState) -> SessionState {
        let _ = self.updates.send(SessionUpdate::Finished(state));
        state
    }
}
