//! Graceful shutdown of the HTTP listener and the broadcaster.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Stops accepting connections, closes every open event stream, then
/// waits for the server tasks to drain.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    broadcaster: Broadcaster,
}

impl ShutdownCoordinator {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            token: CancellationToken::new(),
            broadcaster,
        }
    }

    /// Token the HTTP listener watches to stop accepting connections.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the listener token, shut down the broadcaster so event
    /// streams end, and wait up to `timeout` for `handles`. Tasks still
    /// running after that are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.token.cancel();
        self.broadcaster.shutdown().await;
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}
