use crate::{config::KafkaConfig, Error, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Creates the output topic on startup when asked to.
pub struct TopicManager {
    admin_client: AdminClient<DefaultClientContext>,
    partitions: i32,
    replication_factor: i32,
    compression: String,
}

impl TopicManager {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let admin_client: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            admin_client,
            partitions: config.topic_partitions,
            replication_factor: config.topic_replication_factor,
            compression: config.compression.clone(),
        })
    }

    #[instrument(skip(self), fields(topic = %topic_name))]
    pub async fn ensure_topic_exists(&self, topic_name: &str) -> Result<()> {
        if self.topic_exists(topic_name)? {
            info!("Topic '{}' already exists", topic_name);
            return Ok(());
        }

        info!("Creating topic '{}'", topic_name);
        self.create_topic(topic_name).await
    }

    fn topic_exists(&self, topic_name: &str) -> Result<bool> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(topic_name), Duration::from_secs(5))
            .map_err(Error::Kafka)?;

        // Brokers with auto-creation disabled still list the topic, with an error.
        Ok(metadata
            .topics()
            .iter()
            .any(|topic| topic.name() == topic_name && topic.error().is_none()))
    }

    async fn create_topic(&self, topic_name: &str) -> Result<()> {
        let new_topic = NewTopic::new(
            topic_name,
            self.partitions,
            TopicReplication::Fixed(self.replication_factor),
        )
        .set("cleanup.policy", "delete")
        .set("compression.type", &self.compression);

        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));

        let results = self
            .admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(Error::Kafka)?;

        for result in results {
            match result {
                Ok(topic) => {
                    info!("Successfully created topic: {}", topic);
                }
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    warn!("Topic '{}' was created concurrently", topic);
                }
                Err((_topic, error)) => {
                    return Err(Error::Kafka(rdkafka::error::KafkaError::AdminOp(error)));
                }
            }
        }

        Ok(())
    }
}
