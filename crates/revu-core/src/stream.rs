use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Simplified, session-scoped event delivered to browser clients.
///
/// Tool events for one `call_id` follow the runtime's own tool state
/// machine: `ToolStart → ToolRunning* → (ToolDone | ToolError)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Text {
        delta: String,
        message_id: String,
        part_id: String,
    },
    Reasoning {
        delta: String,
        message_id: String,
        part_id: String,
    },
    ToolStart {
        tool: String,
        call_id: String,
        input: Value,
        message_id: String,
        part_id: String,
    },
    ToolRunning {
        tool: String,
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        message_id: String,
        part_id: String,
    },
    ToolDone {
        tool: String,
        call_id: String,
        output: String,
        title: String,
        message_id: String,
        part_id: String,
    },
    ToolError {
        tool: String,
        call_id: String,
        error: String,
        message_id: String,
        part_id: String,
    },
    Status {
        status: SessionStatusKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
    Done {
        message_id: String,
    },
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatusKind {
    Busy,
    Idle,
    Retry,
}

impl StreamEvent {
    /// Wire name of the variant (the `type` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolStart { .. } => "tool-start",
            Self::ToolRunning { .. } => "tool-running",
            Self::ToolDone { .. } => "tool-done",
            Self::ToolError { .. } => "tool-error",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
            Self::Connected => "connected",
        }
    }

    /// The tool call this event belongs to, for `tool-*` variants.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolStart { call_id, .. }
            | Self::ToolRunning { call_id, .. }
            | Self::ToolDone { call_id, .. }
            | Self::ToolError { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Error frame emitted when a subscriber's sequence breaks.
    pub fn stream_error(message: impl Into<String>) -> Self {
        Self::Error {
            code: "stream_error".into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_wire_shape() {
        let event = StreamEvent::Text {
            delta: "hi".into(),
            message_id: "msg_1".into(),
            part_id: "prt_1".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "text", "delta": "hi", "messageId": "msg_1", "partId": "prt_1"})
        );
    }

    #[test]
    fn tool_start_wire_shape() {
        let event = StreamEvent::ToolStart {
            tool: "bash".into(),
            call_id: "call_1".into(),
            input: json!({"command": "ls"}),
            message_id: "msg_1".into(),
            part_id: "prt_1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool-start");
        assert_eq!(value["callId"], "call_1");
        assert_eq!(value["input"]["command"], "ls");
    }

    #[test]
    fn tool_running_omits_missing_title() {
        let event = StreamEvent::ToolRunning {
            tool: "bash".into(),
            call_id: "call_1".into(),
            title: None,
            message_id: "m".into(),
            part_id: "p".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool-running");
        assert!(value.get("title").is_none());
    }

    #[test]
    fn status_wire_shape() {
        let event = StreamEvent::Status { status: SessionStatusKind::Busy, message: None };
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"type": "status", "status": "busy"}));

        let event = StreamEvent::Status {
            status: SessionStatusKind::Retry,
            message: Some("rate limited".into()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "status", "status": "retry", "message": "rate limited"})
        );
    }

    #[test]
    fn connected_and_done_wire_shape() {
        assert_eq!(
            serde_json::to_value(StreamEvent::Connected).unwrap(),
            json!({"type": "connected"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Done { message_id: "msg_1".into() }).unwrap(),
            json!({"type": "done", "messageId": "msg_1"})
        );
    }

    #[test]
    fn stream_error_code() {
        let value = serde_json::to_value(StreamEvent::stream_error("boom")).unwrap();
        assert_eq!(value, json!({"type": "error", "code": "stream_error", "message": "boom"}));
    }

    #[test]
    fn kind_matches_serialized_type() {
        let events = [
            StreamEvent::Connected,
            StreamEvent::Done { message_id: "m".into() },
            StreamEvent::stream_error("x"),
            StreamEvent::ToolError {
                tool: "t".into(),
                call_id: "c".into(),
                error: "e".into(),
                message_id: "m".into(),
                part_id: "p".into(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn call_id_only_for_tool_events() {
        let done = StreamEvent::ToolDone {
            tool: "t".into(),
            call_id: "call_7".into(),
            output: "ok".into(),
            title: "T".into(),
            message_id: "m".into(),
            part_id: "p".into(),
        };
        assert_eq!(done.call_id(), Some("call_7"));
        assert_eq!(StreamEvent::Connected.call_id(), None);
    }

    #[test]
    fn deserializes_from_wire() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"done","messageId":"msg_2"}"#).unwrap();
        assert_eq!(event, StreamEvent::Done { message_id: "msg_2".into() });
    }
}
