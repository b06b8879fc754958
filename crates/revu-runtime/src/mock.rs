use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use revu_core::errors::ConnectionError;
use revu_core::runtime::RuntimeEvent;
use revu_core::source::{EventSource, RuntimeEventStream};

/// Scripted outcome of one `connect()` call.
pub enum MockConnect {
    /// Yield the events, then end the stream.
    Events(Vec<RuntimeEvent>),
    /// Yield the events, then stay open until dropped.
    EventsThenHold(Vec<RuntimeEvent>),
    /// Forward whatever the paired [`MockFeed`] sends.
    Feed(mpsc::UnboundedReceiver<Result<RuntimeEvent, ConnectionError>>),
    /// Fail the connection attempt itself.
    Error(ConnectionError),
}

impl MockConnect {
    /// A connection driven by the returned handle.
    pub fn feed() -> (MockFeed, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MockFeed { tx }, Self::Feed(rx))
    }

    pub fn refused() -> Self {
        Self::Error(ConnectionError::Request("connection refused".into()))
    }
}

/// Sending half of a [`MockConnect::Feed`] connection.
#[derive(Clone)]
pub struct MockFeed {
    tx: mpsc::UnboundedSender<Result<RuntimeEvent, ConnectionError>>,
}

impl MockFeed {
    /// Push an event. Returns false once the consumer dropped the stream.
    pub fn send(&self, event: RuntimeEvent) -> bool {
        self.tx.send(Ok(event)).is_ok()
    }

    /// Fail the stream with a transport error.
    pub fn fail(&self, error: ConnectionError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the consumer has dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Event source that replays scripted connections for deterministic tests.
///
/// Connect calls beyond the script fail with a request error.
pub struct MockEventSource {
    script: Mutex<VecDeque<MockConnect>>,
    connect_calls: Mutex<Vec<Instant>>,
    open_streams: Arc<AtomicUsize>,
}

impl MockEventSource {
    pub fn new(script: Vec<MockConnect>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connect_calls: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a scripted connection.
    pub fn push(&self, next: MockConnect) {
        self.script.lock().push_back(next);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.lock().len()
    }

    /// When each `connect()` call happened.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_calls.lock().clone()
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<RuntimeEventStream, ConnectionError> {
        self.connect_calls.lock().push(Instant::now());
        let next = self.script.lock().pop_front();

        let inner: RuntimeEventStream = match next {
            Some(MockConnect::Events(events)) => Box::pin(stream::iter(events.into_iter().map(Ok))),
            Some(MockConnect::EventsThenHold(events)) => Box::pin(
                stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
            ),
            Some(MockConnect::Feed(rx)) => Box::pin(UnboundedReceiverStream::new(rx)),
            Some(MockConnect::Error(error)) => return Err(error),
            None => return Err(ConnectionError::Request("mock script exhausted".into())),
        };

        let guard = OpenGuard::new(&self.open_streams);
        Ok(Box::pin(inner.map(move |item| {
            let _held = &guard;
            item
        })))
    }
}
