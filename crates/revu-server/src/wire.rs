//! Server-push encoding of a subscription.
//!
//! Frame sequence: one `: connected` comment, then one `data: <json>`
//! frame per [`StreamEvent`]. If an event cannot be encoded, a single
//! `error{code: "stream_error"}` frame is written and the response ends.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use revu_core::stream::StreamEvent;

use crate::subscriber::Subscription;

const OPEN_COMMENT: &str = "connected";

/// Encode a subscription as a stream of SSE frames.
pub fn encode(mut subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        yield Ok::<_, Infallible>(Event::default().comment(OPEN_COMMENT));

        while let Some(event) = subscription.next().await {
            match frame(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => {
                    warn!(subscriber_id = %subscription.id(), error = %e, "failed to encode event");
                    yield Ok(error_frame(&e.to_string()));
                    break;
                }
            }
        }

        debug!(subscriber_id = %subscription.id(), "event stream closed");
    }
}

/// Full HTTP response for a subscription.
pub fn sse_response(subscription: Subscription, keep_alive: Duration) -> impl IntoResponse {
    let sse = Sse::new(encode(subscription)).keep_alive(KeepAlive::new().interval(keep_alive));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        sse,
    )
}

fn frame(event: &StreamEvent) -> Result<Event, serde_json::Error> {
    Ok(Event::default().data(serde_json::to_string(event)?))
}

fn error_frame(message: &str) -> Event {
    match frame(&StreamEvent::stream_error(message)) {
        Ok(frame) => frame,
        Err(_) => Event::default().data(r#"{"type":"error","code":"stream_error","message":"encoding failed"}"#),
    }
}
