use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ConnectionError;
use crate::runtime::RuntimeEvent;

/// Live feed of raw runtime events. Ends when the transport closes; an
/// `Err` item means the transport failed and no more items follow.
pub type RuntimeEventStream = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, ConnectionError>> + Send>>;

/// Opens the upstream event feed.
///
/// Each `connect` call makes exactly one attempt. Retry policy belongs to
/// the caller. Dropping the returned stream releases the connection.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<RuntimeEventStream, ConnectionError>;
}
