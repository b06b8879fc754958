use std::time::Duration;

/// Failure of the upstream event feed. Every variant is recoverable by
/// reconnecting; the classification only feeds logs.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("runtime returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("no data for {0:?}")]
    IdleTimeout(Duration),
    #[error("stream closed by runtime")]
    Closed,
}

impl ConnectionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request_failed",
            Self::Status { .. } => "bad_status",
            Self::Stream(_) => "stream_interrupted",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::Closed => "closed",
        }
    }

    /// Build a status error, trimming oversized bodies.
    pub fn from_status(status: u16, body: String) -> Self {
        const MAX_BODY: usize = 512;
        let body = if body.len() > MAX_BODY {
            let mut end = MAX_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &body[..end])
        } else {
            body
        };
        Self::Status { status, body }
    }
}

/// A single upstream frame that could not be decoded. Skipped, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame has no type discriminator")]
    MissingType,
}

/// Errors surfaced by the broadcast core.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BroadcastError {
    #[error("gave up after {attempts} reconnect attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("broadcaster is shut down")]
    ShutDown,
    /// `subscribe` was called outside a tokio runtime, so the upstream task
    /// has nowhere to run.
    #[error("no async runtime to drive the upstream connection")]
    NoRuntime,
}
