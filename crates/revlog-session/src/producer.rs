//! Producer trait and the refresh driver.

use std::sync::Arc;

use async_trait::async_trait;
use revlog_core::{ProducerError, Record};
use tracing::warn;

use crate::{ControllerError, SessionController};

/// Discovers records for a session.
///
/// Implementations call [`SessionController::report_initial`] (optionally)
/// and [`SessionController::accept_record`] on the sink. The cycle start and
/// end are handled by [`SessionController::refresh`].
#[async_trait]
pub trait RecordProducer<R: Record>: Send + Sync {
    /// Produce the records of one refresh cycle.
    async fn produce(&self, sink: &SessionController<R>) -> Result<(), ProducerError>;
}

/// How a refresh cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The producer ran to completion.
    Completed,
    /// The producer failed; partial results were still published and finalized.
    Failed(ProducerError),
}

impl<R: Record> SessionController<R> {
    /// Run one full refresh cycle with `producer`.
    ///
    /// `finished` is always called, so partial results are flushed and timers
    /// are released even when the producer fails.
    ///
    /// # Errors
    /// Returns error on lifecycle misuse or if the consumer has stopped.
    pub async fn refresh<P>(&self, producer: &P) -> Result<RefreshOutcome, ControllerError>
    where
        P: RecordProducer<R> + ?Sized,
    {
        self.before_refresh().await?;

        let outcome = match producer.produce(self).await {
            Ok(()) => RefreshOutcome::Completed,
            Err(error) => RefreshOutcome::Failed(error),
        };

        let reported = match &outcome {
            RefreshOutcome::Failed(error) => self.report_failure(error.clone()).await,
            RefreshOutcome::Completed => Ok(()),
        };
        let finished = self.finished().await;

        if let Err(e) = &reported {
            warn!(session_id = %self.id(), error = %e, "Failure could not be delivered");
        }
        reported?;
        finished?;
        Ok(outcome)
    }

    /// Run [`refresh`](Self::refresh) on a background task.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        producer: Arc<dyn RecordProducer<R>>,
    ) -> tokio::task::JoinHandle<Result<RefreshOutcome, ControllerError>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.refresh(producer.as_ref()).await })
    }
}
