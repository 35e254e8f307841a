pub mod memory;
pub mod producer;
pub mod publisher;
pub mod registry;
pub mod serializer;
pub mod subject;
pub mod topic_manager;


pub use memory::MemoryStream;
pub use producer::{KafkaProducer, OutboundRecord, StreamSink};
pub use publisher::{format_timestamp, PublishEnvelope, StreamPublisher, EVENT_CREATION_TIMESTAMP};
pub use registry::{HttpSchemaRegistry, MemorySchemaRegistry, SchemaRegistry};
pub use serializer::AvroSerializer;
pub use subject::SubjectNameStrategy;
pub use topic_manager::TopicManager;
