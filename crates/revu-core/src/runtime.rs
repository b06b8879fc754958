//! Raw events published by the agent runtime's `/event` feed.
//!
//! Frames arrive as `{"type": "...", "properties": {...}}`. The `type`
//! discriminator is decoded into a closed set of variants; anything the
//! broadcaster has no use for, or whose payload doesn't have the expected
//! shape, lands in [`RuntimeEvent::Unknown`] instead of failing the frame.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::DecodeError;

/// A raw runtime event, decoded at the boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeEvent {
    /// `message.part.updated`
    MessagePartUpdated { part: Part, delta: Option<String> },
    /// `session.status`
    SessionStatus { session_id: String, status: SessionStatusInfo },
    /// `session.idle`
    SessionIdle { session_id: String },
    /// `session.error`
    SessionError {
        session_id: Option<String>,
        error: Option<SessionErrorInfo>,
    },
    /// `message.updated`
    MessageUpdated { info: MessageInfo },
    /// `server.connected`
    ServerConnected,
    /// Any other event type, or a known type with an unusable payload.
    Unknown { event_type: String },
}

/// One part of an assistant message (text, reasoning, tool call, ...).
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<String>,
    #[serde(rename = "messageID", default)]
    pub message_id: String,
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(rename = "callID", default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub state: Option<ToolState>,
}

/// Kind of a message part, derived from its `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartKind {
    Text,
    Reasoning,
    Tool,
    Other,
}

impl Part {
    pub fn kind(&self) -> PartKind {
        match self.part_type.as_str() {
            "text" => PartKind::Text,
            "reasoning" => PartKind::Reasoning,
            "tool" => PartKind::Tool,
            _ => PartKind::Other,
        }
    }
}

/// State of a tool call as tracked by the runtime.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ToolState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SessionStatusInfo {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SessionErrorInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: Option<SessionErrorData>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SessionErrorData {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MessageInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub time: MessageTime,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MessageTime {
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    properties: Value,
}

#[derive(Deserialize)]
struct PartUpdatedProps {
    part: Part,
    #[serde(default)]
    delta: Option<String>,
}

#[derive(Deserialize)]
struct SessionStatusProps {
    #[serde(rename = "sessionID")]
    session_id: String,
    status: SessionStatusInfo,
}

#[derive(Deserialize)]
struct SessionIdleProps {
    #[serde(rename = "sessionID")]
    session_id: String,
}

#[derive(Deserialize)]
struct SessionErrorProps {
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<SessionErrorInfo>,
}

#[derive(Deserialize)]
struct MessageUpdatedProps {
    info: MessageInfo,
}

impl RuntimeEvent {
    /// Decode one `data:` payload from the feed.
    ///
    /// Only a frame that isn't JSON, or has no `type`, is an error. A known
    /// type whose `properties` can't be read becomes `Unknown`.
    pub fn decode(data: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(data)?;
        let event_type = envelope.event_type.ok_or(DecodeError::MissingType)?;
        Ok(Self::from_parts(event_type, envelope.properties))
    }

    fn from_parts(event_type: String, properties: Value) -> Self {
        let decoded = match event_type.as_str() {
            "message.part.updated" => serde_json::from_value::<PartUpdatedProps>(properties)
                .map(|p| Self::MessagePartUpdated { part: p.part, delta: p.delta }),
            "session.status" => serde_json::from_value::<SessionStatusProps>(properties)
                .map(|p| Self::SessionStatus { session_id: p.session_id, status: p.status }),
            "session.idle" => serde_json::from_value::<SessionIdleProps>(properties)
                .map(|p| Self::SessionIdle { session_id: p.session_id }),
            "session.error" => serde_json::from_value::<SessionErrorProps>(properties)
                .map(|p| Self::SessionError { session_id: p.session_id, error: p.error }),
            "message.updated" => serde_json::from_value::<MessageUpdatedProps>(properties)
                .map(|p| Self::MessageUpdated { info: p.info }),
            "server.connected" => Ok(Self::ServerConnected),
            _ => return Self::Unknown { event_type },
        };

        decoded.unwrap_or_else(|e| {
            tracing::debug!(event_type = %event_type, error = %e, "unusable event payload");
            Self::Unknown { event_type }
        })
    }

    /// The runtime's name for this event type.
    pub fn event_type(&self) -> &str {
        match self {
            Self::MessagePartUpdated { .. } => "message.part.updated",
            Self::SessionStatus { .. } => "session.status",
            Self::SessionIdle { .. } => "session.idle",
            Self::SessionError { .. } => "session.error",
            Self::MessageUpdated { .. } => "message.updated",
            Self::ServerConnected => "server.connected",
            Self::Unknown { event_type } => event_type,
        }
    }

    /// The session this event belongs to, if it names one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::MessagePartUpdated { part, .. } => part.session_id.as_deref(),
            Self::SessionStatus { session_id, .. } | Self::SessionIdle { session_id } => {
                Some(session_id)
            }
            Self::SessionError { session_id, .. } => session_id.as_deref(),
            Self::MessageUpdated { info } => info.session_id.as_deref(),
            Self::ServerConnected | Self::Unknown { .. } => None,
        }
    }
}
