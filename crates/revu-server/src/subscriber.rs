use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{ready, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use revu_core::ids::{SessionId, SubscriberId};
use revu_core::runtime::RuntimeEvent;
use revu_core::stream::StreamEvent;
use revu_core::transform::transform;

use crate::broadcaster::SubscriberGuard;

/// One subscriber's private, session-scoped view of the upstream feed.
///
/// Yields every matching event in publish order. Ends when the broadcaster
/// shuts down and the queue is drained. Dropping it releases the subscriber
/// slot.
pub struct Subscription {
    id: SubscriberId,
    session_id: SessionId,
    events: UnboundedReceiverStream<Arc<RuntimeEvent>>,
    _guard: SubscriberGuard,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        session_id: SessionId,
        rx: mpsc::UnboundedReceiver<Arc<RuntimeEvent>>,
        guard: SubscriberGuard,
    ) -> Self {
        Self {
            id,
            session_id,
            events: UnboundedReceiverStream::new(rx),
            _guard: guard,
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Stream for Subscription {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.events.poll_next_unpin(cx)) {
                Some(raw) => {
                    if let Some(event) = transform(&raw, self.session_id.as_str()) {
                        return Poll::Ready(Some(event));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
