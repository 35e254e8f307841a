use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::document::{DocumentSchema, SchemaValidator};
use crate::kafka::{AvroSerializer, HttpSchemaRegistry, KafkaProducer, StreamPublisher, TopicManager};
use crate::pipeline::{DeadLetterSink, ExceptionClassifier, Pipeline, PipelineStats};
use crate::queue::RedisQueue;
use crate::record::RecordMapper;
use crate::{Config, Error, Result};

/// Wires the Redis queue, the Kafka producer and the schema registry into a
/// [`Pipeline`] and runs it.
pub struct Bridge {
    config: Config,
}

impl Bridge {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<PipelineStats> {
        info!("Bridge starting");
        let config = &self.config;
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let schema = DocumentSchema::load(&config.schema.document_schema)?;
        let validator = SchemaValidator::new(schema)?;

        let registry = Arc::new(HttpSchemaRegistry::new(&config.kafka.schema_registry_url));
        let serializer = AvroSerializer::load(
            &config.schema.record_schema,
            registry,
            config.kafka.subject_name_strategy,
        )?;

        if config.kafka.create_topic {
            TopicManager::new(&config.kafka)?
                .ensure_topic_exists(&config.kafka.topic)
                .await?;
        }

        let producer = KafkaProducer::new(&config.kafka.brokers, &config.kafka)?;
        let publisher = StreamPublisher::new(Arc::new(producer), serializer, &config.kafka.topic);

        let queue = Arc::new(RedisQueue::connect(&config.queue).await?);
        queue.init_consumer_group().await?;

        let mut standby = shutdown.clone();
        tokio::select! {
            acquired = queue.acquire_exclusive() => acquired?,
            _ = standby.wait_for(|stop| *stop) => {
                info!("Shutdown requested while on standby");
                return Ok(PipelineStats::default());
            }
        }

        let pipeline = Pipeline::new(
            queue.clone(),
            validator,
            RecordMapper::new(),
            publisher,
            DeadLetterSink::new(&config.queue.dead_letter_queue),
            ExceptionClassifier::new(),
            config.pipeline_config(),
        );

        let result = pipeline.run(shutdown).await;

        if let Err(e) = queue.release_exclusive().await {
            warn!(error = %e, "Failed to release exclusive consumer lease");
        }
        result
    }
}
