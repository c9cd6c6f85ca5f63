//! Ordered delivery of snapshots to the consumer task.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{ProducerError, PublishError, Record, SessionConsumer, Snapshot};

enum Delivery<R> {
    Snapshot {
        snapshot: Snapshot<R>,
        ack: Option<oneshot::Sender<()>>,
    },
    Failure(ProducerError),
    Finalized {
        ack: oneshot::Sender<()>,
    },
}

/// Sends session state to a consumer running on its own task.
///
/// The consumer task handles one delivery at a time, in the order they were
/// submitted. Ordering between concurrent publishers is not arbitrated
/// here: callers publish from behind the batcher gate, so submission order
/// already equals apply order.
pub struct Publisher<R> {
    tx: mpsc::Sender<Delivery<R>>,
}

impl<R> Clone for Publisher<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Record> Publisher<R> {
    /// Spawn the consumer task and return a publisher feeding it.
    ///
    /// The task ends once every publisher has been dropped.
    pub fn spawn<C>(consumer: C, capacity: usize) -> (Self, tokio::task::JoinHandle<()>)
    where
        C: SessionConsumer<R>,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_consumer(consumer, rx));
        (Self { tx }, handle)
    }

    /// Queue a snapshot for the consumer.
    ///
    /// # Errors
    /// Returns error if the consumer task has stopped.
    pub async fn publish(&self, snapshot: Snapshot<R>) -> Result<(), PublishError> {
        self.send(Delivery::Snapshot {
            snapshot,
            ack: None,
        })
        .await
    }

    /// Queue a snapshot and wait until the consumer has handled it.
    ///
    /// # Errors
    /// Returns error if the consumer task has stopped.
    pub async fn publish_and_wait(&self, snapshot: Snapshot<R>) -> Result<(), PublishError> {
        let (ack, done) = oneshot::channel();
        self.send(Delivery::Snapshot {
            snapshot,
            ack: Some(ack),
        })
        .await?;
        done.await.map_err(|_| PublishError::ConsumerClosed)
    }

    /// Forward a producer failure to the consumer.
    ///
    /// # Errors
    /// Returns error if the consumer task has stopped.
    pub async fn notify_failure(&self, error: ProducerError) -> Result<(), PublishError> {
        self.send(Delivery::Failure(error)).await
    }

    /// Signal the end of growth and wait until the consumer has handled it,
    /// along with everything queued before it.
    ///
    /// # Errors
    /// Returns error if the consumer task has stopped.
    pub async fn finalize(&self) -> Result<(), PublishError> {
        let (ack, done) = oneshot::channel();
        self.send(Delivery::Finalized { ack }).await?;
        done.await.map_err(|_| PublishError::ConsumerClosed)
    }

    /// Whether the consumer task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, delivery: Delivery<R>) -> Result<(), PublishError> {
        self.tx
            .send(delivery)
            .await
            .map_err(|_| PublishError::ConsumerClosed)
    }
}

async fn run_consumer<R, C>(mut consumer: C, mut rx: mpsc::Receiver<Delivery<R>>)
where
    R: Record,
    C: SessionConsumer<R>,
{
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Snapshot { snapshot, ack } => {
                consumer.on_snapshot(snapshot).await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Delivery::Failure(error) => {
                warn!(error = %error, "Producer reported a failure");
                consumer.on_failure(error).await;
            }
            Delivery::Finalized { ack } => {
                consumer.on_finalized().await;
                let _ = ack.send(());
            }
        }
    }
    debug!("All publishers dropped, consumer task stopped");
}
