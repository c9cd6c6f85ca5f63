//! Size- and time-triggered batching with serialized delivery.
//!
//! Records are buffered until either `threshold` of them are pending or
//! `interval` has passed since the first one arrived. The downstream
//! [`BatchHandler`] lives behind a single-slot async mutex (the gate), and
//! pending records are only taken once the gate is held. A flush queued
//! behind a slow handler therefore always carries records that arrived
//! after the ones being handled, never before.

use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tracing::debug;

use crate::{Batch, BatchHandler, Record, SessionConfig};

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Threshold,
    Timer,
    Explicit,
}

struct Pending<R> {
    records: Vec<R>,
    /// Bumped whenever a pending set is taken. Timers remember the epoch
    /// they were armed in and only flush that set.
    epoch: u64,
    next_seq: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner<R, H> {
    threshold: usize,
    interval: Duration,
    pending: Mutex<Pending<R>>,
    gate: AsyncMutex<H>,
}

/// Buffers records and hands them to `H` in batches, one batch at a time.
pub struct Batcher<R, H> {
    inner: Arc<Inner<R, H>>,
}

impl<R, H> Clone for Batcher<R, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, H> Batcher<R, H>
where
    R: Record,
    H: BatchHandler<R>,
{
    /// Create a batcher. A zero threshold is treated as 1.
    #[must_use]
    pub fn new(threshold: usize, interval: Duration, handler: H) -> Self {
        Self {
            inner: Arc::new(Inner {
                threshold: threshold.max(1),
                interval,
                pending: Mutex::new(Pending {
                    records: Vec::new(),
                    epoch: 0,
                    next_seq: 0,
                    timer: None,
                }),
                gate: AsyncMutex::new(handler),
            }),
        }
    }

    /// Create a batcher using the thresholds from `config`.
    #[must_use]
    pub fn from_config(config: &SessionConfig, handler: H) -> Self {
        Self::new(config.batch_size_threshold, config.batch_interval(), handler)
    }

    /// Buffer one record.
    ///
    /// Flushes before returning when the threshold is reached; otherwise
    /// makes sure a timer is armed for the current pending set.
    pub async fn consume_one(&self, record: R) {
        let flush_now = {
            let mut pending = self.lock_pending();
            pending.records.push(record);
            if pending.records.len() >= self.inner.threshold {
                true
            } else {
                if pending.timer.is_none() {
                    let epoch = pending.epoch;
                    pending.timer = Some(self.arm_timer(epoch));
                }
                false
            }
        };

        if flush_now {
            self.flush_with(Trigger::Threshold, None).await;
        }
    }

    /// Deliver everything pending as one batch. No-op when nothing is pending.
    ///
    /// Waits for any batch currently being handled to finish first.
    pub async fn flush(&self) {
        self.flush_with(Trigger::Explicit, None).await;
    }

    /// Flush, then keep exclusive access to the handler.
    ///
    /// No other batch can be delivered until the returned guard is dropped.
    pub async fn flush_and_hold(&self) -> tokio::sync::MutexGuard<'_, H> {
        let mut handler = self.inner.gate.lock().await;
        if let Some(batch) = self.take_batch(Trigger::Explicit, None) {
            handler.handle_batch(batch).await;
        }
        handler
    }

    /// Exclusive access to the handler through the delivery gate.
    pub async fn lock_handler(&self) -> tokio::sync::MutexGuard<'_, H> {
        self.inner.gate.lock().await
    }

    /// Number of records waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock_pending().records.len()
    }

    /// Release the armed timer, if any. Pending records stay buffered until
    /// the next explicit flush.
    pub fn shutdown(&self) {
        if let Some(timer) = self.lock_pending().timer.take() {
            timer.abort();
        }
    }

    async fn flush_with(&self, trigger: Trigger, epoch: Option<u64>) {
        let mut handler = self.inner.gate.lock().await;
        if let Some(batch) = self.take_batch(trigger, epoch) {
            handler.handle_batch(batch).await;
        }
    }

    /// Take the pending set. Must only be called while holding the gate.
    fn take_batch(&self, trigger: Trigger, epoch: Option<u64>) -> Option<Batch<R>> {
        let mut pending = self.lock_pending();
        if epoch.is_some_and(|armed| armed != pending.epoch) {
            // The set this timer was armed for has already been flushed.
            return None;
        }

        if let Some(timer) = pending.timer.take() {
            // A timer flush is running inside its own task; only detach it.
            if trigger != Trigger::Timer {
                timer.abort();
            }
        }

        if pending.records.is_empty() {
            return None;
        }

        let records = mem::take(&mut pending.records);
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.epoch += 1;
        drop(pending);

        debug!(seq, size = records.len(), ?trigger, "Flushing batch");
        Batch::new(seq, records)
    }

    fn arm_timer(&self, epoch: u64) -> JoinHandle<()> {
        let batcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(batcher.inner.interval).await;
            batcher.flush_with(Trigger::Timer, Some(epoch)).await;
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending<R>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
