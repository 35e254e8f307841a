#![allow(dead_code)]

use apache_avro::types::Value;
use apache_avro::Schema;
use mq_kafka_bridge::config::{Config, KafkaConfig, PipelineConfig, QueueConfig, SchemaConfig};
use mq_kafka_bridge::document::{DocumentSchema, SchemaValidator};
use mq_kafka_bridge::kafka::{
    AvroSerializer, MemorySchemaRegistry, MemoryStream, StreamPublisher, SubjectNameStrategy,
};
use mq_kafka_bridge::pipeline::{DeadLetterSink, ExceptionClassifier, Pipeline};
use mq_kafka_bridge::queue::MemoryQueue;
use mq_kafka_bridge::record::RecordMapper;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

pub const SOURCE_QUEUE: &str = "company_queue";
pub const DEAD_LETTER_QUEUE: &str = "company_dlq";
pub const TOPIC: &str = "company_topic";

pub const DOCUMENT_SCHEMA: &str = include_str!("../../schemas/company.schema.json");
pub const RECORD_SCHEMA: &str = include_str!("../../schemas/employee_details.avsc");
pub const COMPANY_XML: &str = include_str!("../fixtures/company.xml");

/// In-memory queue, stream and registry around one pipeline.
pub struct Harness {
    pub queue: MemoryQueue,
    pub stream: MemoryStream,
    pub registry: MemorySchemaRegistry,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_classifier(ExceptionClassifier::new())
    }

    pub fn with_classifier(classifier: ExceptionClassifier) -> Self {
        let queue = MemoryQueue::new(SOURCE_QUEUE);
        let stream = MemoryStream::new();
        let registry = MemorySchemaRegistry::new();

        let validator =
            SchemaValidator::new(DocumentSchema::from_json(DOCUMENT_SCHEMA).unwrap()).unwrap();
        let serializer = AvroSerializer::new(
            RECORD_SCHEMA,
            Arc::new(registry.clone()),
            SubjectNameStrategy::TopicRecordName,
        )
        .unwrap();
        let publisher = StreamPublisher::new(Arc::new(stream.clone()), serializer, TOPIC);

        let pipeline = Pipeline::new(
            Arc::new(queue.clone()),
            validator,
            RecordMapper::new(),
            publisher,
            DeadLetterSink::new(DEAD_LETTER_QUEUE),
            classifier,
            PipelineConfig {
                source_queue: SOURCE_QUEUE.to_string(),
                topic: TOPIC.to_string(),
                dead_letter_queue: DEAD_LETTER_QUEUE.to_string(),
            },
        );

        Self {
            queue,
            stream,
            registry,
            pipeline,
        }
    }
}

/// The fixture document with `element`'s text replaced.
pub fn company_xml_with(element: &str, value: &str) -> String {
    let (start, end) = element_span(element);
    format!(
        "{}<{}>{}</{}>{}",
        &COMPANY_XML[..start],
        element,
        value,
        element,
        &COMPANY_XML[end..]
    )
}

/// The fixture document without `element`.
pub fn company_xml_without(element: &str) -> String {
    let (start, end) = element_span(element);
    format!("{}{}", &COMPANY_XML[..start], &COMPANY_XML[end..])
}

fn element_span(element: &str) -> (usize, usize) {
    let open = format!("<{}>", element);
    let close = format!("</{}>", element);
    let start = COMPANY_XML.find(&open).unwrap();
    let end = COMPANY_XML.find(&close).unwrap() + close.len();
    (start, end)
}

/// Decodes a Confluent-framed value back into its record fields.
pub fn decode_value(framed: &[u8]) -> Vec<(String, Value)> {
    assert_eq!(framed[0], 0, "missing magic byte");
    let schema = Schema::parse_str(RECORD_SCHEMA).unwrap();
    let mut datum = &framed[5..];
    match apache_avro::from_avro_datum(&schema, &mut datum, None).unwrap() {
        Value::Record(fields) => fields,
        other => panic!("expected a record, got {:?}", other),
    }
}

pub fn field<'a>(fields: &'a [(String, Value)], name: &str) -> &'a Value {
    &fields.iter().find(|(n, _)| n == name).unwrap().1
}

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    let suffix = std::process::id();
    let schema_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas");

    let queue = QueueConfig {
        url: env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        source_queue: format!("test_company_queue_{}", suffix),
        dead_letter_queue: format!("test_company_dlq_{}", suffix),
        consumer_group: "test-bridge".to_string(),
        consumer_name: "test-bridge-0".to_string(),
        block_ms: 500,
        redelivery_delay_ms: 100,
        lease_ttl_ms: 10_000,
    };

    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        topic: format!("test_company_topic_{}", suffix),
        schema_registry_url: env::var("TEST_SCHEMA_REGISTRY_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string()),
        subject_name_strategy: SubjectNameStrategy::TopicRecordName,
        compression: "none".to_string(), // No compression for tests
        acks: "all".to_string(),
        linger_ms: 0,
        message_timeout_ms: 5000,
        create_topic: true,
        topic_partitions: 1,
        topic_replication_factor: 1,
    };

    let schema = SchemaConfig {
        document_schema: schema_dir.join("company.schema.json"),
        record_schema: schema_dir.join("employee_details.avsc"),
    };

    Config {
        queue,
        kafka,
        schema,
    }
}
