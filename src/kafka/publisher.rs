use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::info;

use super::producer::{OutboundRecord, StreamSink};
use super::serializer::AvroSerializer;
use crate::record::EmployeeDetails;
use crate::Result;

/// Header carrying the publish instant.
pub const EVENT_CREATION_TIMESTAMP: &str = "eventCreationTimestamp";

/// What was handed to the stream for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishEnvelope {
    pub record: EmployeeDetails,
    pub created_at: DateTime<Utc>,
    pub message: OutboundRecord,
}

impl PublishEnvelope {
    pub fn key(&self) -> &str {
        &self.message.key
    }
}

/// Serializes canonical records and publishes them keyed by employee id.
pub struct StreamPublisher {
    sink: Arc<dyn StreamSink>,
    serializer: AvroSerializer,
    topic: String,
}

impl StreamPublisher {
    pub fn new(sink: Arc<dyn StreamSink>, serializer: AvroSerializer, topic: impl Into<String>) -> Self {
        Self {
            sink,
            serializer,
            topic: topic.into(),
        }
    }

    /// Publishes `record` and waits for the stream's acknowledgement.
    ///
    /// Serialization failures surface as [`crate::Error::Serialization`];
    /// anything the sink reports is passed through untouched.
    pub async fn publish(&self, record: &EmployeeDetails) -> Result<PublishEnvelope> {
        let payload = self.serializer.serialize(&self.topic, record).await?;
        let created_at = Utc::now();
        let timestamp = format_timestamp(created_at);

        let message = OutboundRecord {
            topic: self.topic.clone(),
            key: record.key().to_string(),
            payload,
            headers: vec![(EVENT_CREATION_TIMESTAMP.to_string(), timestamp.clone())],
        };

        info!(
            topic = %message.topic,
            key = %message.key,
            event_creation_timestamp = %timestamp,
            bytes = message.payload.len(),
            "Publishing record"
        );
        self.sink.send(&message).await?;

        Ok(PublishEnvelope {
            record: record.clone(),
            created_at,
            message,
        })
    }
}

/// RFC 3339 in UTC with millisecond precision, e.g. `2024-03-18T09:15:00.123Z`.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
