//! Conversation assembler: folds the event sequence of one stream session
//! into the visible transcript state.
//!
//! `Transcript::apply` is the reducer. It mutates in place so token appends
//! stay O(1) (streaming UIs redraw on every token), but takes no other input
//! than the event, which keeps it unit-testable on synthetic event logs.

use tracing::warn;

use crate::events::StreamEvent;
use crate::types::{ChatMessage, ToolTrace};

/// How the owning stream ended, if it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Still accepting events.
    Streaming,
    /// Terminated by a `done` event.
    Done,
    /// Terminated by an `error` event or a transport failure.
    Failed,
    /// Abandoned by the caller.
    Cancelled,
}

/// The growing state of one agent exchange: the user question, the
/// incrementally-built assistant answer, and the tool-invocation traces.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Known once the caller resumes a conversation, or once `done` arrives.
    pub conversation_id: Option<String>,
    /// User message followed by the (initially provisional) assistant message.
    pub messages: Vec<ChatMessage>,
    /// Tool traces in invocation order.
    pub traces: Vec<ToolTrace>,
    outcome: Outcome,
}

impl Transcript {
    /// Start a transcript for one question: a user message plus an empty
    /// provisional assistant message, both with client-generated ids.
    pub fn begin(question: &str, conversation_id: Option<String>) -> Self {
        let conv = conversation_id.clone().unwrap_or_default();
        Self {
            conversation_id,
            messages: vec![
                ChatMessage::user(conv.clone(), question),
                ChatMessage::assistant(conv),
            ],
            traces: Vec::new(),
            outcome: Outcome::Streaming,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome != Outcome::Streaming
    }

    /// The user message for this exchange.
    pub fn user_message(&self) -> &ChatMessage {
        &self.messages[0]
    }

    /// The assistant message for this exchange.
    pub fn assistant_message(&self) -> &ChatMessage {
        &self.messages[1]
    }

    /// Mark the transcript abandoned. The provisional assistant message is
    /// left as-is for the caller to keep or discard.
    pub fn mark_cancelled(&mut self) {
        if !self.is_terminal() {
            self.outcome = Outcome::Cancelled;
        }
    }

    /// Mark the transcript failed with an inline annotation, preserving the
    /// partially-built answer and any completed tool traces.
    pub fn mark_failed(&mut self, message: &str) {
        if self.is_terminal() {
            return;
        }
        let assistant = &mut self.messages[1];
        if !assistant.content.is_empty() {
            assistant.content.push_str("\n\n");
        }
        assistant.content.push_str("[error] ");
        assistant.content.push_str(message);
        self.outcome = Outcome::Failed;
    }

    /// Fold one stream event into the transcript. No-op once terminal.
    pub fn apply(&mut self, event: &StreamEvent) {
        if self.is_terminal() {
            return;
        }

        match event {
            StreamEvent::Token { content, .. } => {
                self.messages[1].content.push_str(content);
            }

            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                tool_args,
                ..
            } => {
                // Duplicate call for an already-open id is a no-op.
                if self.traces.iter().any(|t| t.id == *tool_call_id) {
                    return;
                }
                self.traces
                    .push(ToolTrace::open(tool_call_id, tool_name, tool_args.clone()));
            }

            StreamEvent::ToolResult {
                tool_call_id,
                result,
                ..
            } => match self.traces.iter_mut().find(|t| t.id == *tool_call_id) {
                Some(trace) => {
                    trace.finish(result.clone());
                }
                None => {
                    // Orphaned result: never opened by a tool_call.
                    warn!(tool_call_id = %tool_call_id, "ignoring tool_result with unknown correlation id");
                }
            },

            StreamEvent::Done {
                conversation_id,
                message_id,
                content,
                tools_used,
                tool_rounds,
                total_usage,
                ..
            } => {
                self.conversation_id = Some(conversation_id.clone());
                for message in &mut self.messages {
                    message.conversation_id = conversation_id.clone();
                }

                let assistant = &mut self.messages[1];
                assistant.id = message_id.clone();
                // The server-issued final content wins when present; it
                // covers tokens lost to dropped frames.
                if !content.is_empty() {
                    assistant.content = content.clone();
                }
                if !tools_used.is_empty() {
                    assistant.tools_used = Some(tools_used.clone());
                }
                assistant.tool_rounds = Some(*tool_rounds);
                assistant.usage = total_usage.clone();

                self.outcome = Outcome::Done;
            }

            StreamEvent::Error { error, .. } => {
                self.mark_failed(error);
            }

            // Forward-compatible pass-through events carry nothing to fold.
            StreamEvent::Other { .. } => {}
        }
    }
}
