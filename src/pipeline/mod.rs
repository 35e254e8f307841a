//! Consume, validate, map, publish, acknowledge.
//!
//! Each message is handled inside one queue transaction. Content failures
//! are diverted to the dead-letter queue and committed with the
//! acknowledgement; infrastructure failures roll the transaction back so the
//! queue redelivers the message.

pub mod classifier;
pub mod dead_letter;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::document::SchemaValidator;
use crate::kafka::{PublishEnvelope, StreamPublisher};
use crate::queue::{Delivery, MessageQueue, Transaction};
use crate::record::RecordMapper;
use crate::{Error, Result};

pub use self::classifier::{Disposition, ExceptionClassifier};
pub use self::dead_letter::{DeadLetterEnvelope, DeadLetterSink, FailureInfo};

/// Where a message is in its unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Received,
    Validating,
    Mapping,
    Publishing,
    Diverting,
    Committed,
    RolledBack,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "Received",
            Stage::Validating => "Validating",
            Stage::Mapping => "Mapping",
            Stage::Publishing => "Publishing",
            Stage::Diverting => "Diverting",
            Stage::Committed => "Committed",
            Stage::RolledBack => "RolledBack",
        };
        f.write_str(name)
    }
}

/// How a message left the pipeline. Exactly one per committed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Published(PublishEnvelope),
    Diverted(DeadLetterEnvelope),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub published: u64,
    pub diverted: u64,
    pub rolled_back: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    diverted: AtomicU64,
    rolled_back: AtomicU64,
}

pub struct Pipeline {
    queue: Arc<dyn MessageQueue>,
    validator: SchemaValidator,
    mapper: RecordMapper,
    publisher: StreamPublisher,
    dead_letter: DeadLetterSink,
    classifier: ExceptionClassifier,
    config: PipelineConfig,
    counters: Counters,
}

impl Pipeline {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        validator: SchemaValidator,
        mapper: RecordMapper,
        publisher: StreamPublisher,
        dead_letter: DeadLetterSink,
        classifier: ExceptionClassifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            validator,
            mapper,
            publisher,
            dead_letter,
            classifier,
            config,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            published: self.counters.published.load(Ordering::Relaxed),
            diverted: self.counters.diverted.load(Ordering::Relaxed),
            rolled_back: self.counters.rolled_back.load(Ordering::Relaxed),
        }
    }

    /// Receives one message and carries it through to commit or rollback.
    ///
    /// Fatal errors are returned after the transaction has been rolled back.
    pub async fn process_next(&self) -> Result<Outcome> {
        let tx = self.queue.receive().await?;
        self.process(tx).await
    }

    /// Processes messages until `shutdown` flips to `true`.
    ///
    /// A fatal error on one message is logged and the loop goes on with the
    /// redelivery. Failing to receive ends the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<PipelineStats> {
        info!(
            source_queue = %self.config.source_queue,
            topic = %self.config.topic,
            dead_letter_queue = %self.config.dead_letter_queue,
            "Starting pipeline"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let tx = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.queue.receive() => match received {
                    Ok(tx) => tx,
                    Err(e) => {
                        error!(error = %e, "Failed to receive from queue");
                        return Err(e);
                    }
                },
            };

            if let Err(e) = self.process(tx).await {
                warn!(error = %e, kind = %e.kind(), "Message rolled back, awaiting redelivery");
            }
        }

        let stats = self.stats();
        info!(
            published = stats.published,
            diverted = stats.diverted,
            rolled_back = stats.rolled_back,
            "Pipeline stopped"
        );
        Ok(stats)
    }

    async fn process(&self, mut tx: Transaction) -> Result<Outcome> {
        let delivery = tx.delivery().clone();
        debug!(
            id = %delivery.id,
            queue = %delivery.queue,
            redelivered = delivery.redelivered,
            delivery_count = delivery.delivery_count,
            headers = ?delivery.headers,
            stage = %Stage::Received,
            "Received message"
        );

        let (stage, err) = match self.handle(&delivery).await {
            Ok(envelope) => {
                self.commit(tx, &delivery).await?;
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                return Ok(Outcome::Published(envelope));
            }
            Err(failure) => failure,
        };

        match self.classifier.classify(&err) {
            Disposition::Divertible => {
                error!(
                    id = %delivery.id,
                    failure_kind = %err.kind(),
                    failed_stage = %stage,
                    exception_caught = %err,
                    headers = ?delivery.headers,
                    stage = %Stage::Diverting,
                    "Diverting message to dead-letter queue"
                );
                let envelope = self
                    .dead_letter
                    .divert(&mut tx, &FailureInfo::new(&err, stage));
                self.commit(tx, &delivery).await?;
                self.counters.diverted.fetch_add(1, Ordering::Relaxed);
                Ok(Outcome::Diverted(envelope))
            }
            Disposition::Fatal => {
                self.roll_back(tx, &delivery, stage, &err).await;
                Err(err)
            }
        }
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<PublishEnvelope, (Stage, Error)> {
        debug!(id = %delivery.id, stage = %Stage::Validating, "Validating document");
        let document = self
            .validator
            .validate(delivery.payload.clone())
            .map_err(|e| (Stage::Validating, e))?;

        debug!(
            id = %delivery.id,
            bytes = document.raw().len(),
            stage = %Stage::Mapping,
            "Mapping document"
        );
        let record = self
            .mapper
            .map(document.body())
            .map_err(|e| (Stage::Mapping, e))?;

        debug!(
            id = %delivery.id,
            key = %record.key(),
            stage = %Stage::Publishing,
            "Publishing record"
        );
        self.queue
            .ensure_active()
            .await
            .map_err(|e| (Stage::Publishing, e))?;
        self.publisher
            .publish(&record)
            .await
            .map_err(|e| (Stage::Publishing, e))
    }

    async fn commit(&self, tx: Transaction, delivery: &Delivery) -> Result<()> {
        if let Err(e) = self.queue.commit(tx).await {
            self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
            warn!(
                id = %delivery.id,
                error = %e,
                stage = %Stage::RolledBack,
                "Commit failed, message left for redelivery"
            );
            return Err(e);
        }
        debug!(id = %delivery.id, stage = %Stage::Committed, "Committed");
        Ok(())
    }

    async fn roll_back(&self, tx: Transaction, delivery: &Delivery, stage: Stage, err: &Error) {
        self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
        warn!(
            id = %delivery.id,
            failed_stage = %stage,
            kind = %err.kind(),
            error = %err,
            stage = %Stage::RolledBack,
            "Rolling back transaction"
        );
        if let Err(e) = self.queue.rollback(tx).await {
            error!(id = %delivery.id, error = %e, "Rollback failed");
        }
    }
}
