//! Latest-state + broadcast consumer for late subscribers.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::{ProducerError, Record, SessionConsumer, Snapshot};

/// Live broadcast capacity. Slow subscribers that fall further behind skip
/// ahead; the next snapshot supersedes the ones they missed anyway.
const BROADCAST_CAPACITY: usize = 1024;

/// What a [`SnapshotStore`] subscriber sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent<R> {
    Snapshot(Snapshot<R>),
    Failure(ProducerError),
    Finalized,
}

struct Inner<R> {
    /// Cycle of the most recent snapshot, even one that was not kept.
    cycle: Option<u64>,
    latest: Option<Snapshot<R>>,
    failure: Option<ProducerError>,
    finalized: bool,
}

/// Consumer that remembers the latest session state and fans it out.
///
/// New subscribers receive the current state first, then live updates,
/// so they can attach at any point of a refresh cycle.
///
/// Once a session has been shown, empty snapshots are ignored so an empty
/// refresh never blanks an existing view.
pub struct SnapshotStore<R> {
    inner: RwLock<Inner<R>>,
    sender: broadcast::Sender<SessionEvent<R>>,
}

impl<R: Record> Default for SnapshotStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> SnapshotStore<R> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                cycle: None,
                latest: None,
                failure: None,
                finalized: false,
            }),
            sender,
        }
    }

    /// Most recent snapshot, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Snapshot<R>> {
        self.read().latest.clone()
    }

    /// Whether the current cycle has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.read().finalized
    }

    /// Last failure reported by the producer.
    #[must_use]
    pub fn last_failure(&self) -> Option<ProducerError> {
        self.read().failure.clone()
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent<R>> {
        self.sender.subscribe()
    }

    /// Stream that yields the current state first, then live updates.
    #[must_use]
    pub fn latest_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionEvent<R>> {
        // Subscribe under the lock so nothing falls between state and live.
        let (current, rx) = {
            let inner = self.read();
            let mut current = Vec::with_capacity(3);
            if let Some(snapshot) = &inner.latest {
                current.push(SessionEvent::Snapshot(snapshot.clone()));
            }
            if let Some(failure) = &inner.failure {
                current.push(SessionEvent::Failure(failure.clone()));
            }
            if inner.finalized {
                current.push(SessionEvent::Finalized);
            }
            (current, self.sender.subscribe())
        };

        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });
        futures::stream::iter(current).chain(live).boxed()
    }

    fn record(&self, event: SessionEvent<R>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;
        match &event {
            SessionEvent::Snapshot(snapshot) => {
                if inner.cycle != Some(snapshot.cycle()) {
                    inner.cycle = Some(snapshot.cycle());
                    inner.failure = None;
                    inner.finalized = false;
                }
                if inner.latest.is_some() && snapshot.is_empty() {
                    debug!(cycle = snapshot.cycle(), "Ignoring empty snapshot");
                    return;
                }
                inner.latest = Some(snapshot.clone());
            }
            SessionEvent::Failure(error) => inner.failure = Some(error.clone()),
            SessionEvent::Finalized => inner.finalized = true,
        }
        let _ = self.sender.send(event);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner<R>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<R: Record> SessionConsumer<R> for Arc<SnapshotStore<R>> {
    async fn on_snapshot(&mut self, snapshot: Snapshot<R>) {
        self.record(SessionEvent::Snapshot(snapshot));
    }

    async fn on_finalized(&mut self) {
        self.record(SessionEvent::Finalized);
    }

    async fn on_failure(&mut self, error: ProducerError) {
        self.record(SessionEvent::Failure(error));
    }
}
