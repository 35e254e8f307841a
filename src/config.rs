use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::kafka::SubjectNameStrategy;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub kafka: KafkaConfig,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub url: String,
    pub source_queue: String,
    pub dead_letter_queue: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub schema_registry_url: String,
    #[serde(default)]
    pub subject_name_strategy: SubjectNameStrategy,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default)]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u32,
    #[serde(default)]
    pub create_topic: bool,
    #[serde(default = "default_topic_partitions")]
    pub topic_partitions: i32,
    #[serde(default = "default_topic_replication_factor")]
    pub topic_replication_factor: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    /// Structural schema for inbound documents (JSON).
    pub document_schema: PathBuf,
    /// Avro writer schema for the canonical record (`.avsc`).
    pub record_schema: PathBuf,
}

/// Immutable routing settings handed to the pipeline at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source_queue: String,
    pub topic: String,
    pub dead_letter_queue: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MQ_BRIDGE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The exclusive-consumer lease has to outlive the longest single wait
    /// the bridge can make between two refreshes.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let longest_wait = u64::from(self.kafka.message_timeout_ms) + self.queue.block_ms;
        if self.queue.lease_ttl_ms <= longest_wait {
            return Err(config::ConfigError::Message(format!(
                "queue.lease_ttl_ms ({}) must exceed kafka.message_timeout_ms + queue.block_ms ({})",
                self.queue.lease_ttl_ms, longest_wait
            )));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            source_queue: self.queue.source_queue.clone(),
            topic: self.kafka.topic.clone(),
            dead_letter_queue: self.queue.dead_letter_queue.clone(),
        }
    }
}

fn default_consumer_group() -> String {
    "mq-kafka-bridge".to_string()
}

fn default_consumer_name() -> String {
    "bridge-0".to_string()
}

fn default_block_ms() -> u64 {
    5000
}

fn default_redelivery_delay_ms() -> u64 {
    1000
}

fn default_lease_ttl_ms() -> u64 {
    60_000
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_message_timeout_ms() -> u32 {
    30_000
}

fn default_topic_partitions() -> i32 {
    1
}

fn default_topic_replication_factor() -> i32 {
    1
}
