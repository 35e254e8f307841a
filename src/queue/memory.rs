use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::{Delivery, MessageQueue, QueueMessage, Transaction};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    message: QueueMessage,
    delivery_count: u32,
}

#[derive(Default)]
struct MemoryQueueState {
    queues: HashMap<String, VecDeque<Stored>>,
    in_flight: Option<(Stored, Weak<()>)>,
    next_id: u64,
    failing_commits: usize,
}

impl MemoryQueueState {
    fn push_back(&mut self, queue: &str, message: QueueMessage) {
        self.next_id += 1;
        let stored = Stored {
            id: self.next_id.to_string(),
            message,
            delivery_count: 0,
        };
        self.queues.entry(queue.to_string()).or_default().push_back(stored);
    }

    fn requeue(&mut self, queue: &str) {
        if let Some((stored, _)) = self.in_flight.take() {
            self.queues.entry(queue.to_string()).or_default().push_front(stored);
        }
    }
}

/// In-process transactional queue with a single exclusive consumer.
///
/// Other queues (e.g. the dead-letter queue) live in the same instance so
/// staged sends can be applied atomically with the acknowledgement.
#[derive(Clone)]
pub struct MemoryQueue {
    source: String,
    state: Arc<Mutex<MemoryQueueState>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            state: Arc::new(Mutex::new(MemoryQueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Puts a message on the source queue.
    pub fn enqueue(&self, message: QueueMessage) {
        let source = self.source.clone();
        self.send_to(&source, message);
    }

    pub fn enqueue_payload(&self, payload: impl Into<Bytes>) {
        self.enqueue(QueueMessage::new(payload));
    }

    pub fn send_to(&self, queue: &str, message: QueueMessage) {
        self.lock().push_back(queue, message);
        if queue == self.source {
            self.notify.notify_one();
        }
    }

    /// Snapshot of the messages waiting on `queue`.
    pub fn messages(&self, queue: &str) -> Vec<QueueMessage> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|s| s.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages on `queue`, counting an unacknowledged in-flight delivery.
    pub fn depth(&self, queue: &str) -> usize {
        let state = self.lock();
        let waiting = state.queues.get(queue).map_or(0, VecDeque::len);
        let in_flight = usize::from(queue == self.source && state.in_flight.is_some());
        waiting + in_flight
    }

    /// Makes the next `count` commits fail as the transaction manager would.
    pub fn fail_next_commits(&self, count: usize) {
        self.lock().failing_commits = count;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_in_flight(state: &MemoryQueueState, tx: &Transaction) -> Result<()> {
        match &state.in_flight {
            Some((stored, _)) if stored.id == tx.delivery().id => Ok(()),
            _ => Err(Error::Transaction(format!(
                "delivery {} is not in flight",
                tx.delivery().id
            ))),
        }
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn receive(&self) -> Result<Transaction> {
        loop {
            {
                let mut state = self.lock();
                let dropped = match &state.in_flight {
                    Some((_, open)) if open.strong_count() > 0 => {
                        return Err(Error::Transaction(
                            "a delivery is already in flight on this consumer".to_string(),
                        ));
                    }
                    Some((stored, _)) => Some(stored.id.clone()),
                    None => None,
                };
                // Dropped without commit or rollback: treat it as rolled back.
                if let Some(id) = dropped {
                    warn!(id = %id, "Transaction dropped while open, requeueing delivery");
                    state.requeue(&self.source);
                }
                let next = state
                    .queues
                    .get_mut(&self.source)
                    .and_then(VecDeque::pop_front);
                if let Some(mut stored) = next {
                    stored.delivery_count += 1;
                    let delivery = Delivery {
                        id: stored.id.clone(),
                        queue: self.source.clone(),
                        payload: stored.message.payload.clone(),
                        headers: stored.message.headers.clone(),
                        redelivered: stored.delivery_count > 1,
                        delivery_count: stored.delivery_count,
                    };
                    let tx = Transaction::new(delivery);
                    state.in_flight = Some((stored, tx.liveness()));
                    return Ok(tx);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let mut state = self.lock();
        Self::check_in_flight(&state, &tx)?;

        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            state.requeue(&self.source);
            return Err(Error::Transaction(format!(
                "commit of delivery {} failed",
                tx.delivery().id
            )));
        }

        let (delivery, staged) = tx.into_parts();
        for (destination, message) in staged {
            state.push_back(&destination, message);
        }
        state.in_flight = None;
        debug!(id = %delivery.id, "Committed delivery");
        Ok(())
    }

    async fn rollback(&self, tx: Transaction) -> Result<()> {
        let mut state = self.lock();
        Self::check_in_flight(&state, &tx)?;
        state.requeue(&self.source);
        debug!(id = %tx.delivery().id, "Rolled back delivery");
        Ok(())
    }
}
