//! In-process dispatch queue
//!
//! Each topic keeps a FIFO of ready messages, the set of deliveries handed
//! out but not yet settled, and a dead-letter list. Consumers park on a
//! `Notify` until a message is published or the queue is closed. A message
//! stays owned by the queue until it is acked, so a consumer that dies
//! between `receive` and `ack` never silently loses it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::traits::{Delivery, DispatchQueue};
use crate::types::LedgerError;

#[derive(Debug, Default)]
struct Topic {
    ready: Mutex<VecDeque<Delivery>>,
    in_flight: DashMap<Uuid, Delivery>,
    dead_letters: Mutex<Vec<Delivery>>,
    available: Notify,
    idle: Notify,
}

impl Topic {
    fn push(&self, delivery: Delivery) -> Result<(), LedgerError> {
        self.ready
            .lock()
            .map_err(|_| LedgerError::queue("ready queue lock poisoned"))?
            .push_back(delivery);
        self.available.notify_one();
        Ok(())
    }

    /// Pop the next ready message and mark it in flight
    fn take(&self) -> Result<Option<Delivery>, LedgerError> {
        let mut ready = self
            .ready
            .lock()
            .map_err(|_| LedgerError::queue("ready queue lock poisoned"))?;

        let Some(mut delivery) = ready.pop_front() else {
            return Ok(None);
        };
        delivery.delivery_count += 1;
        self.in_flight.insert(delivery.id, delivery.clone());

        // Pass the wakeup on if more work is waiting
        if !ready.is_empty() {
            self.available.notify_one();
        }
        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery) -> Result<Delivery, LedgerError> {
        self.in_flight
            .remove(&delivery.id)
            .map(|(_, d)| d)
            .ok_or_else(|| {
                LedgerError::queue(format!(
                    "delivery {} is not in flight on topic '{}'",
                    delivery.id, delivery.topic
                ))
            })
    }

    fn depth(&self) -> usize {
        self.ready.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn is_idle(&self) -> bool {
        self.depth() == 0 && self.in_flight.is_empty()
    }

    fn signal_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }
}

/// At-least-once in-memory queue
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    topics: DashMap<String, Arc<Topic>>,
    closed: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(topic.value());
        }
        Arc::clone(self.topics.entry(name.to_string()).or_default().value())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Messages waiting to be received on a topic
    pub fn depth(&self, topic: &str) -> usize {
        self.topic(topic).depth()
    }

    /// Messages handed out on a topic but not yet acked or nacked
    pub fn in_flight(&self, topic: &str) -> usize {
        self.topic(topic).in_flight.len()
    }

    /// Messages rejected without requeue on a topic
    pub fn dead_letters(&self, topic: &str) -> Vec<Delivery> {
        self.topic(topic)
            .dead_letters
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DispatchQueue for InMemoryQueue {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::queue("queue is closed"));
        }
        self.topic(topic).push(Delivery {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            payload,
            delivery_count: 0,
        })
    }

    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, LedgerError> {
        let topic = self.topic(topic);
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = topic.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Ok(None);
            }
            if let Some(delivery) = topic.take()? {
                return Ok(Some(delivery));
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), LedgerError> {
        let topic = self.topic(&delivery.topic);
        topic.settle(delivery)?;
        topic.signal_if_idle();
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), LedgerError> {
        let topic = self.topic(&delivery.topic);
        let settled = topic.settle(delivery)?;
        if requeue {
            topic.push(settled)?;
        } else {
            topic
                .dead_letters
                .lock()
                .map_err(|_| LedgerError::queue("dead-letter lock poisoned"))?
                .push(settled);
        }
        topic.signal_if_idle();
        Ok(())
    }

    async fn wait_idle(&self, topic: &str) -> Result<(), LedgerError> {
        let topic = self.topic(topic);
        loop {
            let notified = topic.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if topic.is_idle() || self.is_closed() {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn close(&self) -> Result<(), LedgerError> {
        self.closed.store(true, Ordering::Release);
        for topic in self.topics.iter() {
            topic.available.notify_waiters();
            topic.idle.notify_waiters();
        }
        Ok(())
    }
}
