//! Wire events carried by stream frames, and the dispatch step that turns a
//! decoded frame into a typed event.
//!
//! The protocol is tolerant of forward-compatible additions: payloads that do
//! not parse, or that lack the `type` discriminant, are dropped; payloads with
//! an unrecognized `type` are passed through opaquely.

use serde::Deserialize;

use crate::sse::Frame;
use crate::types::Usage;

/// One typed event from the answer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of the assistant answer.
    Token { ts: i64, content: String },

    /// The agent invoked a tool.
    ToolCall {
        ts: i64,
        tool_call_id: String,
        tool_name: String,
        tool_args: serde_json::Value,
    },

    /// A previously-invoked tool returned.
    ToolResult {
        ts: i64,
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },

    /// The answer completed; carries server-issued identity and metadata.
    Done {
        ts: i64,
        conversation_id: String,
        message_id: String,
        content: String,
        tools_used: Vec<String>,
        tool_rounds: u32,
        total_usage: Option<Usage>,
    },

    /// The answering process failed mid-stream.
    Error { ts: i64, error: String },

    /// Unrecognized event type, passed through for forward compatibility.
    Other {
        event_type: String,
        payload: serde_json::Value,
    },
}

impl StreamEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenWire {
    #[serde(default)]
    ts: i64,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallWire {
    #[serde(default)]
    ts: i64,
    tool_call_id: String,
    tool_name: String,
    #[serde(default)]
    tool_args: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultWire {
    #[serde(default)]
    ts: i64,
    tool_call_id: String,
    tool_name: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoneWire {
    #[serde(default)]
    ts: i64,
    conversation_id: String,
    message_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tools_used: Vec<String>,
    #[serde(default)]
    tool_rounds: u32,
    #[serde(default)]
    total_usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ErrorWire {
    #[serde(default)]
    ts: i64,
    error: String,
}

/// Parse a frame payload into a typed event.
///
/// Returns `None` for malformed payloads and for known types whose payload is
/// missing required fields; the caller drops those frames and keeps streaming.
pub fn parse_event(frame: &Frame) -> Option<StreamEvent> {
    let value: serde_json::Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(event = %frame.event, error = %e, "dropping undecodable frame");
            return None;
        }
    };

    let event_type = value.get("type")?.as_str()?.to_string();

    let parsed = match event_type.as_str() {
        "token" => serde_json::from_value::<TokenWire>(value)
            .ok()
            .map(|w| StreamEvent::Token {
                ts: w.ts,
                content: w.content,
            }),
        "tool_call" => serde_json::from_value::<ToolCallWire>(value)
            .ok()
            .map(|w| StreamEvent::ToolCall {
                ts: w.ts,
                tool_call_id: w.tool_call_id,
                tool_name: w.tool_name,
                tool_args: w.tool_args,
            }),
        "tool_result" => serde_json::from_value::<ToolResultWire>(value)
            .ok()
            .map(|w| StreamEvent::ToolResult {
                ts: w.ts,
                tool_call_id: w.tool_call_id,
                tool_name: w.tool_name,
                result: w.result,
            }),
        "done" => serde_json::from_value::<DoneWire>(value)
            .ok()
            .map(|w| StreamEvent::Done {
                ts: w.ts,
                conversation_id: w.conversation_id,
                message_id: w.message_id,
                content: w.content,
                tools_used: w.tools_used,
                tool_rounds: w.tool_rounds,
                total_usage: w.total_usage,
            }),
        "error" => serde_json::from_value::<ErrorWire>(value)
            .ok()
            .map(|w| StreamEvent::Error {
                ts: w.ts,
                error: w.error,
            }),
        _ => Some(StreamEvent::Other {
            event_type,
            payload: value,
        }),
    };

    if parsed.is_none() {
        tracing::debug!(event = %frame.event, "dropping frame with malformed known event");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> Frame {
        Frame {
            event: "message".to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parse_token() {
        let event = parse_event(&frame(r#"{"type":"token","ts":1700000000000,"content":"hi"}"#));
        assert_eq!(
            event,
            Some(StreamEvent::Token {
                ts: 1700000000000,
                content: "hi".to_string()
            })
        );
    }

    #[test]
    fn test_parse_tool_call() {
        let event = parse_event(&frame(
            r#"{"type":"tool_call","ts":1,"toolCallId":"tc1","toolName":"rag_search","toolArgs":{"query":"报表"}}"#,
        ));
        match event {
            Some(StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                tool_args,
                ..
            }) => {
                assert_eq!(tool_call_id, "tc1");
                assert_eq!(tool_name, "rag_search");
                assert_eq!(tool_args["query"], "报表");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_done_with_usage() {
        let event = parse_event(&frame(
            r#"{"type":"done","ts":2,"conversationId":"c1","messageId":"m9","content":"answer",
               "toolsUsed":["rag_search"],"toolRounds":2,
               "totalUsage":{"promptTokens":10,"completionTokens":20,"totalTokens":30}}"#,
        ));
        match event {
            Some(StreamEvent::Done {
                conversation_id,
                message_id,
                tool_rounds,
                total_usage,
                ..
            }) => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(message_id, "m9");
                assert_eq!(tool_rounds, 2);
                assert_eq!(total_usage.unwrap().total_tokens, 30);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_event() {
        let event = parse_event(&frame(r#"{"type":"error","error":"model overloaded"}"#));
        assert_eq!(
            event,
            Some(StreamEvent::Error {
                ts: 0,
                error: "model overloaded".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let event = parse_event(&frame(r#"{"type":"think_step","text":"planning"}"#));
        match event {
            Some(StreamEvent::Other {
                event_type,
                payload,
            }) => {
                assert_eq!(event_type, "think_step");
                assert_eq!(payload["text"], "planning");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payloads_dropped() {
        assert_eq!(parse_event(&frame("not json")), None);
        assert_eq!(parse_event(&frame(r#"{"no":"type"}"#)), None);
        // Known type missing a required field.
        assert_eq!(parse_event(&frame(r#"{"type":"token"}"#)), None);
        assert_eq!(
            parse_event(&frame(r#"{"type":"tool_call","toolName":"x"}"#)),
            None
        );
    }
}
