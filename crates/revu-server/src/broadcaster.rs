//! Single upstream connection fanned out to many subscribers.
//!
//! Every mutation of the connection state, the subscriber table, the idle
//! timer and the upstream handle happens under one mutex. The upstream
//! task and the idle timer re-check their identity under that mutex before
//! touching anything, so a task that lost a race can never clobber the
//! state of its successor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use revu_core::errors::{BroadcastError, ConnectionError};
use revu_core::ids::{ConnectionId, SessionId, SubscriberId};
use revu_core::runtime::RuntimeEvent;
use revu_core::source::{EventSource, RuntimeEventStream};
use revu_core::state::ConnectionState;
use revu_runtime::retry::{RetryPolicy, RetrySchedule};

use crate::subscriber::Subscription;

const DEFAULT_IDLE_TEARDOWN: Duration = Duration::from_millis(5000);

/// Tuning for the broadcast core.
#[derive(Clone, Debug)]
pub struct BroadcasterConfig {
    /// How long the upstream connection survives with zero subscribers.
    pub idle_teardown: Duration,
    pub retry: RetryPolicy,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            idle_teardown: DEFAULT_IDLE_TEARDOWN,
            retry: RetryPolicy::default(),
        }
    }
}

/// Owns the upstream connection lifecycle and the fan-out table.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    source: Arc<dyn EventSource>,
    config: BroadcasterConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    /// One unbounded queue per live subscriber. Nothing is ever dropped for
    /// a slow reader.
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Arc<RuntimeEvent>>>,
    idle_timer: Option<IdleTimer>,
    timer_generation: u64,
    upstream: Option<Upstream>,
    shut_down: bool,
}

struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Upstream {
    id: ConnectionId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum PumpEnd {
    Superseded,
    Failed(ConnectionError),
}

impl Broadcaster {
    pub fn new(source: Arc<dyn EventSource>, config: BroadcasterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                config,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    subscribers: HashMap::new(),
                    idle_timer: None,
                    timer_generation: 0,
                    upstream: None,
                    shut_down: false,
                }),
            }),
        }
    }

    pub fn with_defaults(source: Arc<dyn EventSource>) -> Self {
        Self::new(source, BroadcasterConfig::default())
    }

    /// Register a subscriber for one session.
    ///
    /// Cancels a pending idle teardown and starts the upstream connection
    /// if none is running. The returned subscription only sees events
    /// published after this call.
    pub fn subscribe(&self, session_id: SessionId) -> Result<Subscription, BroadcastError> {
        let subscriber_id = SubscriberId::new();
        let mut inner = self.shared.inner.lock();

        if inner.shut_down {
            return Err(BroadcastError::ShutDown);
        }
        let runtime = match inner.upstream {
            Some(_) => None,
            None => Some(Handle::try_current().map_err(|_| BroadcastError::NoRuntime)?),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.insert(subscriber_id.clone(), tx);
        if let Some(timer) = inner.idle_timer.take() {
            timer.handle.abort();
            debug!("idle teardown cancelled");
        }
        if let Some(runtime) = runtime {
            self.shared.start_upstream(&mut inner, &runtime);
        }
        let subscribers = inner.subscribers.len();
        drop(inner);

        debug!(
            subscriber_id = %subscriber_id,
            session_id = %session_id,
            subscribers,
            "subscriber opened"
        );
        let guard = SubscriberGuard {
            shared: Arc::clone(&self.shared),
            id: subscriber_id.clone(),
        };
        Ok(Subscription::new(subscriber_id, session_id, rx, guard))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.inner.lock().subscribers.len()
    }

    /// Stop everything: idle timer, upstream task, subscriber queues.
    ///
    /// Open subscriptions end once they drain what was already published.
    pub async fn shutdown(&self) {
        let upstream = {
            let mut inner = self.shared.inner.lock();
            if inner.shut_down {
                return;
            }
            inner.shut_down = true;
            if let Some(timer) = inner.idle_timer.take() {
                timer.handle.abort();
            }
            inner.subscribers.clear();
            inner.transition(ConnectionState::Disconnected);
            inner.upstream.take()
        };

        if let Some(upstream) = upstream {
            upstream.cancel.cancel();
            if let Err(e) = upstream.handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "upstream task ended abnormally");
                }
            }
        }
        info!("broadcaster shut down");
    }
}

impl Shared {
    fn start_upstream(self: &Arc<Self>, inner: &mut Inner, runtime: &Handle) {
        let id = ConnectionId::new();
        let cancel = CancellationToken::new();
        inner.transition(ConnectionState::Connecting);

        info!(connection_id = %id, source = self.source.name(), "starting upstream connection");
        let handle = runtime.spawn(Arc::clone(self).run_upstream(id.clone(), cancel.clone()));
        inner.upstream = Some(Upstream { id, cancel, handle });
    }

    async fn run_upstream(self: Arc<Self>, id: ConnectionId, cancel: CancellationToken) {
        let mut schedule = self.config.retry.schedule();

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.source.connect() => result,
            };

            let failure = match connected {
                Ok(stream) => match self.pump(&id, stream, &cancel, &mut schedule).await {
                    PumpEnd::Superseded => return,
                    PumpEnd::Failed(e) => e,
                },
                Err(e) => e,
            };

            let Some((attempt, delay)) = schedule.next_retry() else {
                self.give_up(&id, schedule.attempt(), &failure);
                return;
            };
            if !self.set_state(&id, ConnectionState::Reconnecting { attempt }) {
                return;
            }
            warn!(
                connection_id = %id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = failure.error_kind(),
                error = %failure,
                "upstream lost, reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump(
        &self,
        id: &ConnectionId,
        mut stream: RuntimeEventStream,
        cancel: &CancellationToken,
        schedule: &mut RetrySchedule,
    ) -> PumpEnd {
        let mut first = true;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return PumpEnd::Superseded,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if first {
                        schedule.reset();
                    }
                    if !self.publish(id, event, first) {
                        return PumpEnd::Superseded;
                    }
                    if first {
                        info!(connection_id = %id, "upstream connected");
                        first = false;
                    }
                }
                Some(Err(e)) => return PumpEnd::Failed(e),
                None => return PumpEnd::Failed(ConnectionError::Closed),
            }
        }
    }

    /// Queue one event for every subscriber if `id` is still the live
    /// connection. The first event of a connection also marks it connected.
    fn publish(&self, id: &ConnectionId, event: RuntimeEvent, first: bool) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_current(id) {
            return false;
        }
        if first {
            inner.transition(ConnectionState::Connected);
        }
        let event = Arc::new(event);
        for tx in inner.subscribers.values() {
            // A closed queue belongs to a subscription whose guard is about to run.
            let _ = tx.send(Arc::clone(&event));
        }
        true
    }

    fn set_state(&self, id: &ConnectionId, state: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_current(id) {
            return false;
        }
        inner.transition(state);
        true
    }

    fn give_up(&self, id: &ConnectionId, attempts: u32, last_error: &ConnectionError) {
        let err = BroadcastError::RetriesExhausted {
            attempts,
            last_error: last_error.to_string(),
        };
        let mut inner = self.inner.lock();
        if !inner.is_current(id) {
            return;
        }
        inner.upstream = None;
        inner.transition(ConnectionState::Error { message: err.to_string() });
        drop(inner);
        error!(connection_id = %id, error = %err, "upstream connection abandoned");
    }

    fn release(self: &Arc<Self>, subscriber_id: &SubscriberId) {
        let mut inner = self.inner.lock();
        inner.subscribers.remove(subscriber_id);
        let subscribers = inner.subscribers.len();

        if subscribers == 0 && !inner.shut_down && inner.idle_timer.is_none() {
            self.arm_idle_timer(&mut inner);
        }
        drop(inner);
        debug!(subscriber_id = %subscriber_id, subscribers, "subscriber closed");
    }

    fn arm_idle_timer(self: &Arc<Self>, inner: &mut Inner) {
        let Ok(runtime) = Handle::try_current() else {
            // Outside a runtime nothing can wait out the delay.
            self.teardown(inner);
            return;
        };

        inner.timer_generation += 1;
        let generation = inner.timer_generation;
        let delay = self.config.idle_teardown;
        // Deadline is fixed at dispose time, not when the task first runs.
        let sleep = tokio::time::sleep(delay);
        let shared = Arc::clone(self);
        let handle = runtime.spawn(async move {
            sleep.await;
            shared.idle_elapsed(generation);
        });
        inner.idle_timer = Some(IdleTimer { generation, handle });
        debug!(delay_ms = delay.as_millis() as u64, "idle teardown armed");
    }

    fn idle_elapsed(&self, generation: u64) {
        let mut inner = self.inner.lock();
        match &inner.idle_timer {
            Some(timer) if timer.generation == generation => {}
            _ => return,
        }
        inner.idle_timer = None;
        if inner.subscribers.is_empty() {
            self.teardown(&mut inner);
            info!("no subscribers left, upstream connection closed");
        }
    }

    fn teardown(&self, inner: &mut Inner) {
        if let Some(upstream) = inner.upstream.take() {
            upstream.cancel.cancel();
        }
        inner.transition(ConnectionState::Disconnected);
    }
}

impl Inner {
    fn is_current(&self, id: &ConnectionId) -> bool {
        self.upstream.as_ref().is_some_and(|u| &u.id == id)
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = self.state.name(), to = next.name(), "connection state changed");
        }
        self.state = next;
    }
}

/// Removes the subscriber's queue when the owning subscription is dropped.
pub(crate) struct SubscriberGuard {
    shared: Arc<Shared>,
    id: SubscriberId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.shared.release(&self.id);
    }
}
