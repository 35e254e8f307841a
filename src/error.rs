//! Error types and result handling for mq-kafka-bridge.
//!
//! This module defines the main error type [`Error`], the stable
//! [`ErrorKind`] used to classify failures, and a convenience [`Result`]
//! type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use mq_kafka_bridge::{Error, ErrorKind, Result};
//!
//! fn publish() -> Result<()> {
//!     Err(Error::Transport("broker unavailable".to_string()))
//! }
//!
//! match publish() {
//!     Ok(()) => println!("Published"),
//!     Err(e) if e.kind() == ErrorKind::Transport => eprintln!("Outage: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// The main error type for bridge operations.
///
/// Content errors (`SchemaValidation`, `Unmarshal`, `Mapping`,
/// `Serialization`) are attributable to a single message. Everything else is
/// infrastructure.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The inbound document violates the structural schema.
    #[error("Schema validation failed: {message}")]
    SchemaValidation {
        /// Every violation found, joined into one diagnostic
        message: String,
        /// The raw payload, unchanged
        payload: Bytes,
    },

    /// The inbound document cannot be parsed into the expected shape.
    #[error("Unmarshal failed: {message}")]
    Unmarshal {
        /// What could not be parsed
        message: String,
        /// The raw payload, unchanged
        payload: Bytes,
    },

    /// A validated field could not be coerced into its canonical type.
    #[error("Mapping failed for field '{field}': {message}")]
    Mapping {
        /// Source element name
        field: String,
        /// Description of the coercion failure
        message: String,
    },

    /// The canonical record cannot be encoded for the stream.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Queue, stream or registry endpoint unreachable or unavailable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Commit or rollback of the consume transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Redis client error on the queue transport.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP error talking to the schema registry.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error reading schema definitions.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error, typically from loading schema files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    #[error("Shutdown requested")]
    Shutdown,
}

/// Stable identifier of an error variant.
///
/// Rendered into the `failureKind` dead-letter header, so the names are part
/// of the dead-letter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    SchemaValidation,
    Unmarshal,
    Mapping,
    Serialization,
    Transport,
    Transaction,
    Io,
    Shutdown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::SchemaValidation => "SchemaValidationError",
            ErrorKind::Unmarshal => "UnmarshalError",
            ErrorKind::Mapping => "MappingError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::Transaction => "TransactionError",
            ErrorKind::Io => "IoError",
            ErrorKind::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Returns the kind of this error.
    ///
    /// Client library errors fold into `Transport`: a broken Kafka, Redis or
    /// registry connection is never the fault of the message being processed.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            Error::Unmarshal { .. } => ErrorKind::Unmarshal,
            Error::Mapping { .. } => ErrorKind::Mapping,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Transport(_) | Error::Kafka(_) | Error::Redis(_) | Error::Http(_) => {
                ErrorKind::Transport
            }
            Error::Transaction(_) => ErrorKind::Transaction,
            Error::Json(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Raw payload carried by content errors raised before parsing completed.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Error::SchemaValidation { payload, .. } | Error::Unmarshal { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }
}

/// A convenient Result type alias for bridge operations.
///
/// This is equivalent to `std::result::Result<T, mq_kafka_bridge::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
