//! Transactional queue transport.
//!
//! A [`Transaction`] wraps one received [`Delivery`] together with the queue
//! sends staged while processing it. Nothing staged is visible and the
//! delivery is not acknowledged until [`MessageQueue::commit`] succeeds;
//! [`MessageQueue::rollback`] leaves the delivery for redelivery.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::Result;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// Header values are kept as raw bytes; the queue does not require UTF-8.
pub type Headers = BTreeMap<String, Bytes>;

/// A message as stored on a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub payload: Bytes,
    pub headers: Headers,
}

impl QueueMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| std::str::from_utf8(value).ok())
    }
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub queue: String,
    pub payload: Bytes,
    pub headers: Headers,
    /// Whether this message was handed out before and not acknowledged.
    pub redelivered: bool,
    pub delivery_count: u32,
}

#[derive(Debug)]
pub struct Transaction {
    delivery: Delivery,
    staged: Vec<(String, QueueMessage)>,
    open: Arc<()>,
}

impl Transaction {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            staged: Vec::new(),
            open: Arc::new(()),
        }
    }

    /// Dies with the transaction, so a queue can tell a dropped one apart
    /// from one still being processed.
    pub(crate) fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.open)
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Stages `message` for `destination`; it is sent on commit.
    pub fn send(&mut self, destination: impl Into<String>, message: QueueMessage) {
        self.staged.push((destination.into(), message));
    }

    pub fn staged(&self) -> &[(String, QueueMessage)] {
        &self.staged
    }

    pub fn into_parts(self) -> (Delivery, Vec<(String, QueueMessage)>) {
        (self.delivery, self.staged)
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Waits for the next message and opens a transaction for it.
    async fn receive(&self) -> Result<Transaction>;

    /// Fails once this consumer may no longer act on its deliveries, e.g.
    /// after losing exclusive access to the queue.
    async fn ensure_active(&self) -> Result<()> {
        Ok(())
    }

    /// Sends everything staged and acknowledges the delivery, atomically.
    ///
    /// On error nothing was sent and the delivery stays unconsumed.
    async fn commit(&self, tx: Transaction) -> Result<()>;

    /// Drops staged sends; the delivery will be received again.
    async fn rollback(&self, tx: Transaction) -> Result<()>;
}
