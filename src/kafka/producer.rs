use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::debug;

use crate::{config::KafkaConfig, Error, Result};

/// A keyed message ready for the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Destination for published records.
///
/// `send` resolves only once the stream has acknowledged the record.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn send(&self, record: &OutboundRecord) -> Result<()>;
}

pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(brokers: &[String], config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("enable.idempotence", "true")
            .set("linger.ms", config.linger_ms.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl StreamSink for KafkaProducer {
    async fn send(&self, record: &OutboundRecord) -> Result<()> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let message = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(message, Timeout::Never)
            .await
            .map_err(|(e, _)| Error::Kafka(e))?;

        debug!(
            topic = %record.topic,
            key = %record.key,
            partition,
            offset,
            "Record acknowledged"
        );
        Ok(())
    }
}
