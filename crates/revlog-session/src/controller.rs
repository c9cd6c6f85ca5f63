//! Session controller for one history subject.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use revlog_core::{
    Batch, BatchHandler, Batcher, ConfigError, ProducerError, PublishError, Publisher, Record,
    SessionAggregator, SessionConfig, SessionConsumer, SizeLimiter, Snapshot,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Session identifier, used to correlate log lines.
pub type SessionId = Uuid;

/// Where the controller is within a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// No refresh running.
    Idle,
    /// Between `before_refresh` and `finished`.
    Collecting,
    /// `finished` is flushing and waiting for the consumer.
    Finalizing,
}

/// What happened to a record passed to [`SessionController::accept_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Buffered for the next batch.
    Accepted,
    /// The cap was already met; the record was ignored.
    CapacityReached,
}

/// Controller error.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{operation} is not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: CycleState,
    },
    #[error("Initial session reported after records were accepted")]
    InitialAfterRecords,
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Apply + publish step, reachable only through the batcher gate.
struct Pipeline<R> {
    aggregator: SessionAggregator<R>,
    publisher: Publisher<R>,
}

#[async_trait]
impl<R: Record> BatchHandler<R> for Pipeline<R> {
    async fn handle_batch(&mut self, batch: Batch<R>) {
        let snapshot = self.aggregator.apply_batch(batch);
        if let Err(e) = self.publisher.publish(snapshot).await {
            warn!(error = %e, "Dropping snapshot");
        }
    }
}

/// Drives one session through `Idle → Collecting → Finalizing → Idle`.
///
/// Producer-facing methods may be called from any task. Everything that
/// touches the session runs behind the batcher gate, so applying a batch
/// and publishing its snapshot never overlaps with another apply.
pub struct SessionController<R: Record> {
    id: SessionId,
    state: Mutex<CycleState>,
    records_accepted: AtomicBool,
    limiter: Arc<SizeLimiter>,
    batcher: Batcher<R, Pipeline<R>>,
}

impl<R: Record> SessionController<R> {
    /// Create a controller and spawn the consumer task.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new<C>(
        config: &SessionConfig,
        consumer: C,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), ControllerError>
    where
        C: SessionConsumer<R>,
    {
        config.validate()?;

        let limiter = Arc::new(SizeLimiter::new(config.max_records));
        let (publisher, consumer_task) = Publisher::spawn(consumer, config.channel_capacity);
        let pipeline = Pipeline {
            aggregator: SessionAggregator::new(Arc::clone(&limiter)),
            publisher,
        };

        let controller = Self {
            id: Uuid::new_v4(),
            state: Mutex::new(CycleState::Idle),
            records_accepted: AtomicBool::new(false),
            limiter,
            batcher: Batcher::from_config(config, pipeline),
        };
        debug!(session_id = %controller.id, ?config, "Created session controller");

        Ok((controller, consumer_task))
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> CycleState {
        *self.lock_state()
    }

    /// Snapshot of the live session, if one exists.
    pub async fn current_snapshot(&self) -> Option<Snapshot<R>> {
        self.batcher.lock_handler().await.aggregator.current_snapshot()
    }

    /// Start a refresh cycle: reset the cap counter and drop the old session.
    ///
    /// # Errors
    /// Returns error if a cycle is already running.
    pub async fn before_refresh(&self) -> Result<(), ControllerError> {
        self.transition("before_refresh", CycleState::Idle, CycleState::Collecting)?;
        self.limiter.reset();
        self.records_accepted.store(false, Ordering::Release);

        let mut pipeline = self.batcher.flush_and_hold().await;
        let cycle = pipeline.aggregator.begin_cycle();
        debug!(session_id = %self.id, cycle, "Refresh started");
        Ok(())
    }

    /// Establish the session from the first authoritative view of the cycle.
    ///
    /// Returns once the consumer has handled the resulting snapshot. A view
    /// identical to the current session is ignored.
    ///
    /// # Errors
    /// Returns error if no cycle is running, records were already accepted,
    /// or the consumer has stopped.
    pub async fn report_initial(&self, records: Vec<R>) -> Result<(), ControllerError> {
        self.ensure("report_initial", CycleState::Collecting)?;
        if self.records_accepted.load(Ordering::Acquire) {
            error!(session_id = %self.id, "Initial session reported after records");
            return Err(ControllerError::InitialAfterRecords);
        }

        let mut pipeline = self.batcher.lock_handler().await;
        if pipeline
            .aggregator
            .current_snapshot()
            .is_some_and(|current| current.records() == records.as_slice())
        {
            debug!(session_id = %self.id, "Initial session unchanged");
            return Ok(());
        }

        let snapshot = pipeline.aggregator.replace_initial(records);
        debug!(
            session_id = %self.id,
            size = snapshot.len(),
            "Publishing initial session"
        );
        pipeline.publisher.publish_and_wait(snapshot).await?;
        Ok(())
    }

    /// Offer one record to the session.
    ///
    /// Records past the cap are ignored rather than rejected.
    ///
    /// # Errors
    /// Returns error if no cycle is running.
    pub async fn accept_record(&self, record: R) -> Result<Admission, ControllerError> {
        self.ensure("accept_record", CycleState::Collecting)?;
        if self.limiter.is_reached() {
            return Ok(Admission::CapacityReached);
        }

        if self.limiter.check_and_count(1) {
            debug!(
                session_id = %self.id,
                admitted = self.limiter.admitted(),
                "Record cap reached"
            );
        }
        self.records_accepted.store(true, Ordering::Release);
        self.batcher.consume_one(record).await;
        Ok(Admission::Accepted)
    }

    /// Surface a producer failure to the consumer.
    ///
    /// Pending records are flushed first, so the consumer sees the failure
    /// after every record collected before it. Collected records are kept;
    /// the cycle still ends with `finished`.
    ///
    /// # Errors
    /// Returns error if no cycle is running or the consumer has stopped.
    pub async fn report_failure(&self, error: ProducerError) -> Result<(), ControllerError> {
        self.ensure("report_failure", CycleState::Collecting)?;
        warn!(session_id = %self.id, error = %error, "Producer failed");

        let pipeline = self.batcher.flush_and_hold().await;
        pipeline.publisher.notify_failure(error).await?;
        Ok(())
    }

    /// End the refresh cycle.
    ///
    /// Flushes pending records, then tells the consumer no more growth will
    /// happen and waits until it has handled that and every earlier
    /// snapshot. Does nothing beyond the flush when no session was
    /// established, and nothing at all when no cycle is running.
    ///
    /// # Errors
    /// Returns error if `finished` is already running or the consumer has stopped.
    pub async fn finished(&self) -> Result<(), ControllerError> {
        if self.state() == CycleState::Idle {
            debug!(session_id = %self.id, "finished called while idle");
            return Ok(());
        }
        self.transition("finished", CycleState::Collecting, CycleState::Finalizing)?;

        let result = {
            let pipeline = self.batcher.flush_and_hold().await;
            if pipeline.aggregator.has_session() {
                pipeline.publisher.finalize().await
            } else {
                debug!(session_id = %self.id, "No session to finalize");
                Ok(())
            }
        };
        self.batcher.shutdown();
        *self.lock_state() = CycleState::Idle;
        debug!(session_id = %self.id, "Refresh finished");

        result.map_err(ControllerError::from)
    }

    fn ensure(&self, operation: &'static str, expected: CycleState) -> Result<(), ControllerError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            error!(session_id = %self.id, operation, ?state, "Lifecycle misuse");
            Err(ControllerError::InvalidState { operation, state })
        }
    }

    fn transition(
        &self,
        operation: &'static str,
        from: CycleState,
        to: CycleState,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock_state();
        if *state != from {
            error!(session_id = %self.id, operation, state = ?*state, "Lifecycle misuse");
            return Err(ControllerError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Record> Drop for SessionController<R> {
    fn drop(&mut self) {
        self.batcher.shutdown();
    }
}
