//! Mapping from raw runtime events to the per-session client view.

use serde_json::Value;

use crate::runtime::{Part, PartKind, RuntimeEvent};
use crate::stream::{SessionStatusKind, StreamEvent};

const UNKNOWN_ERROR: &str = "Unknown error";
/// Error code for a `session.error` that carries no named error object.
const UNKNOWN_ERROR_CODE: &str = "UnknownError";

/// Map a raw event to the view of one session.
///
/// Returns `None` for events tagged with another session, for event types
/// clients don't care about, and for payloads missing the fields a
/// variant needs. Events that carry no session field pass through for
/// every session.
pub fn transform(raw: &RuntimeEvent, session_id: &str) -> Option<StreamEvent> {
    if let Some(owner) = raw.session_id() {
        if owner != session_id {
            return None;
        }
    }

    match raw {
        RuntimeEvent::MessagePartUpdated { part, delta } => transform_part(part, delta.as_deref()),
        RuntimeEvent::SessionStatus { status, .. } => {
            let (status, message) = match status.kind.as_str() {
                "busy" => (SessionStatusKind::Busy, None),
                "idle" => (SessionStatusKind::Idle, None),
                "retry" => (SessionStatusKind::Retry, status.message.clone()),
                _ => return None,
            };
            Some(StreamEvent::Status { status, message })
        }
        RuntimeEvent::SessionIdle { .. } => Some(StreamEvent::Status {
            status: SessionStatusKind::Idle,
            message: None,
        }),
        RuntimeEvent::SessionError { error, .. } => {
            let code = error
                .as_ref()
                .map(|e| e.name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string());
            let message = error
                .as_ref()
                .and_then(|e| e.data.as_ref())
                .and_then(|d| d.message.clone())
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
            Some(StreamEvent::Error { code, message })
        }
        RuntimeEvent::MessageUpdated { info } => {
            if info.role == "assistant" && info.time.completed.is_some() {
                Some(StreamEvent::Done { message_id: info.id.clone() })
            } else {
                None
            }
        }
        RuntimeEvent::ServerConnected => Some(StreamEvent::Connected),
        RuntimeEvent::Unknown { .. } => None,
    }
}

fn transform_part(part: &Part, delta: Option<&str>) -> Option<StreamEvent> {
    let message_id = part.message_id.clone();
    let part_id = part.id.clone();

    match part.kind() {
        PartKind::Text => Some(StreamEvent::Text {
            delta: delta?.to_string(),
            message_id,
            part_id,
        }),
        PartKind::Reasoning => Some(StreamEvent::Reasoning {
            delta: delta?.to_string(),
            message_id,
            part_id,
        }),
        PartKind::Tool => {
            let state = part.state.as_ref()?;
            let tool = part.tool.clone()?;
            let call_id = part.call_id.clone()?;
            match state.status.as_str() {
                "pending" => Some(StreamEvent::ToolStart {
                    tool,
                    call_id,
                    input: match &state.input {
                        Value::Null => Value::Object(Default::default()),
                        input => input.clone(),
                    },
                    message_id,
                    part_id,
                }),
                "running" => Some(StreamEvent::ToolRunning {
                    tool,
                    call_id,
                    title: state.title.clone(),
                    message_id,
                    part_id,
                }),
                "completed" => Some(StreamEvent::ToolDone {
                    tool,
                    call_id,
                    output: state.output.clone().unwrap_or_default(),
                    title: state.title.clone().unwrap_or_default(),
                    message_id,
                    part_id,
                }),
                "error" => Some(StreamEvent::ToolError {
                    tool,
                    call_id,
                    error: state.error.clone().unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
                    message_id,
                    part_id,
                }),
                _ => None,
            }
        }
        PartKind::Other => None,
    }
}
