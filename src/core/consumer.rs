//! Queue consumer loop
//!
//! One consumer takes one message at a time from a topic, hands it to a
//! [`MessageHandler`] and settles the delivery. Several consumers may share a
//! topic; the queue guarantees each message is in flight with at most one of
//! them.
//!
//! - handler success: ack
//! - retryable error: retried in place under the message retry policy
//! - exhausted or non-retryable: `on_exhausted`, then dead-letter

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::retry::RetryPolicy;
use crate::core::traits::{Delivery, DispatchQueue};
use crate::types::LedgerError;

/// Handles messages taken off the dispatch queue
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message; must tolerate duplicates
    async fn handle(&self, delivery: &Delivery) -> Result<(), LedgerError>;

    /// Called once before a message is dead-lettered
    async fn on_exhausted(&self, delivery: &Delivery, error: &LedgerError);
}

/// Counters reported when a consumer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub dead_lettered: u64,
}

pub struct QueueConsumer {
    queue: Arc<dyn DispatchQueue>,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    retry: RetryPolicy,
    worker: usize,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        retry: RetryPolicy,
        worker: usize,
    ) -> Self {
        Self {
            queue,
            topic: topic.into(),
            handler,
            retry,
            worker,
        }
    }

    /// Consume until `shutdown` is cancelled or the queue is closed
    ///
    /// A message already taken is always settled before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        tracing::debug!(worker = self.worker, topic = %self.topic, "consumer started");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(&self.topic) => received,
            };

            match received {
                Ok(Some(delivery)) => self.dispatch(&delivery, &mut stats).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(worker = self.worker, error = %e, "failed to receive message");
                    self.retry.pause(1).await;
                    tokio::task::yield_now().await;
                }
            }
        }

        tracing::debug!(
            worker = self.worker,
            acked = stats.acked,
            dead_lettered = stats.dead_lettered,
            "consumer stopped"
        );
        stats
    }

    async fn dispatch(&self, delivery: &Delivery, stats: &mut ConsumerStats) {
        let result = self
            .retry
            .run(
                "handle message",
                |_| self.handler.handle(delivery),
                LedgerError::is_retryable,
            )
            .await;

        match result {
            Ok(()) => match self.queue.ack(delivery).await {
                Ok(()) => stats.acked += 1,
                Err(e) => tracing::error!(delivery = %delivery.id, error = %e, "failed to ack"),
            },
            Err(e) => {
                tracing::error!(
                    worker = self.worker,
                    delivery = %delivery.id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "message failed, dead-lettering"
                );
                self.handler.on_exhausted(delivery, &e).await;
                match self.queue.nack(delivery, false).await {
                    Ok(()) => stats.dead_lettered += 1,
                    Err(e) => {
                        tracing::error!(delivery = %delivery.id, error = %e, "failed to dead-letter")
                    }
                }
            }
        }
    }
}
