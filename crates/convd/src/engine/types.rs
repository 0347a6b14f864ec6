//! Engine RPC protocol types.
//!
//! The conversion engine is a subprocess speaking JSON-lines over
//! stdin/stdout. Commands go in, two kinds of messages come back:
//! command acks and agent events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Commands (sent to the engine via stdin)
// ============================================================================

/// Base command structure sent to the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineCommand {
    /// Start the agent loop for a session.
    Initialize {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Data directories the agent may read during the conversion.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        directories: Vec<String>,
    },
    /// Send a user prompt to the agent.
    Prompt {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
    /// Abort the current turn.
    Interrupt {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Terminate the engine process cleanly.
    Shutdown {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

// ============================================================================
// Responses (received from the engine via stdout)
// ============================================================================

/// Command acknowledgement from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    /// Which command this acknowledges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub success: bool,
    /// Request ID this response correlates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Events (the agent output stream)
// ============================================================================

/// Closed set of error categories surfaced on the event stream.
///
/// `Connection` is terminal for the session; `Turn` leaves the session
/// usable for the next exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Turn,
}

/// One block of assistant output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Event emitted by the agent during and after a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant output.
    Assistant { content: Vec<ContentBlock> },
    /// Turn summary. Exactly one per completed turn.
    Result {
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        num_turns: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// Something went wrong; the stream stays open for `turn` errors.
    Error { kind: ErrorKind, content: String },
}

impl AgentEvent {
    /// Whether this event ends the current turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }

    pub fn turn_error(content: impl Into<String>) -> Self {
        Self::Error {
            kind: ErrorKind::Turn,
            content: content.into(),
        }
    }

    pub fn connection_error(content: impl Into<String>) -> Self {
        Self::Error {
            kind: ErrorKind::Connection,
            content: content.into(),
        }
    }
}

/// A parsed line of engine stdout.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    Response(EngineResponse),
    Event(AgentEvent),
}

impl EngineMessage {
    /// Parse a line of engine output into either a response or an event.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;

        // Responses are distinguished by type == "response"; everything
        // else is an agent event.
        if value.get("type").and_then(|t| t.as_str()) == Some("response") {
            let response: EngineResponse = serde_json::from_value(value)?;
            Ok(Self::Response(response))
        } else {
            let event: AgentEvent = serde_json::from_value(value)?;
            Ok(Self::Event(event))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serializes_with_tag() {
        let cmd = EngineCommand::Prompt {
            id: Some("req-1".to_string()),
            message: "convert the recordings".to_string(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "prompt");
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["message"], "convert the recordings");
    }

    #[test]
    fn test_command_omits_empty_fields() {
        let cmd = EngineCommand::Initialize {
            id: None,
            model: None,
            directories: vec![],
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "initialize");
        assert!(json.get("id").is_none());
        assert!(json.get("model").is_none());
        assert!(json.get("directories").is_none());
    }

    #[test]
    fn test_parse_response() {
        let line = r#"{"type":"response","command":"prompt","success":true,"id":"req-3"}"#;
        match EngineMessage::parse(line).unwrap() {
            EngineMessage::Response(resp) => {
                assert!(resp.success);
                assert_eq!(resp.id.as_deref(), Some("req-3"));
                assert_eq!(resp.command.as_deref(), Some("prompt"));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_assistant_event() {
        let line = r#"{"type":"assistant","content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"inspect","input":{"path":"/data"}}]}"#;
        match EngineMessage::parse(line).unwrap() {
            EngineMessage::Event(AgentEvent::Assistant { content }) => {
                assert_eq!(content.len(), 2);
                assert!(matches!(content[0], ContentBlock::Text { .. }));
                assert!(matches!(content[1], ContentBlock::ToolUse { .. }));
            }
            other => panic!("expected assistant event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_result_event() {
        let line = r#"{"type":"result","is_error":false,"total_cost_usd":0.12,"num_turns":3,"session_id":"abc","result":"done"}"#;
        match EngineMessage::parse(line).unwrap() {
            EngineMessage::Event(event) => {
                assert!(event.is_terminal());
                match event {
                    AgentEvent::Result {
                        is_error,
                        total_cost_usd,
                        ..
                    } => {
                        assert!(!is_error);
                        assert_eq!(total_cost_usd, Some(0.12));
                    }
                    other => panic!("expected result, got {:?}", other),
                }
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_error_event_round_trip() {
        let event = AgentEvent::turn_error("engine hiccup");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"turn""#));
        match EngineMessage::parse(&json).unwrap() {
            EngineMessage::Event(AgentEvent::Error { kind, content }) => {
                assert_eq!(kind, ErrorKind::Turn);
                assert_eq!(content, "engine hiccup");
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(EngineMessage::parse("not json").is_err());
        assert!(EngineMessage::parse(r#"{"type":"bogus"}"#).is_err());
    }
}
