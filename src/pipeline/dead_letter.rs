use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::Stage;
use crate::kafka::format_timestamp;
use crate::queue::{Headers, QueueMessage, Transaction};
use crate::{Error, ErrorKind};

pub const EXCEPTION_CAUGHT: &str = "exceptionCaught";
pub const FAILURE_KIND: &str = "failureKind";
pub const FAILED_STAGE: &str = "failedStage";
pub const FAILED_AT: &str = "failedAt";

/// Why a message is being diverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: Stage,
    pub failed_at: DateTime<Utc>,
}

impl FailureInfo {
    pub fn new(err: &Error, stage: Stage) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage,
            failed_at: Utc::now(),
        }
    }
}

/// The dead-letter message as staged on the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEnvelope {
    pub destination: String,
    pub payload: Bytes,
    pub headers: Headers,
}

impl DeadLetterEnvelope {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| std::str::from_utf8(value).ok())
    }
}

pub struct DeadLetterSink {
    destination: String,
}

impl DeadLetterSink {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Stages the original payload, byte for byte, on the dead-letter queue.
    ///
    /// The original headers are carried over; failure headers win on clashes.
    /// Nothing is visible until `tx` commits.
    pub fn divert(&self, tx: &mut Transaction, failure: &FailureInfo) -> DeadLetterEnvelope {
        let delivery = tx.delivery();
        let mut headers = delivery.headers.clone();
        headers.insert(EXCEPTION_CAUGHT.to_string(), failure.message.clone().into());
        headers.insert(FAILURE_KIND.to_string(), failure.kind.to_string().into());
        headers.insert(FAILED_STAGE.to_string(), failure.stage.to_string().into());
        headers.insert(
            FAILED_AT.to_string(),
            format_timestamp(failure.failed_at).into(),
        );

        let envelope = DeadLetterEnvelope {
            destination: self.destination.clone(),
            payload: delivery.payload.clone(),
            headers,
        };

        tx.send(
            envelope.destination.clone(),
            QueueMessage {
                payload: envelope.payload.clone(),
                headers: envelope.headers.clone(),
            },
        );
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Delivery;

    fn transaction(payload: &'static [u8]) -> Transaction {
        let mut headers = Headers::new();
        headers.insert("origin".to_string(), Bytes::from_static(b"hr-system"));
        headers.insert("trace".to_string(), Bytes::from_static(&[0xc3, 0x28, 0x01]));
        Transaction::new(Delivery {
            id: "7".to_string(),
            queue: "company_queue".to_string(),
            payload: Bytes::from_static(payload),
            headers,
            redelivered: false,
            delivery_count: 1,
        })
    }

    #[test]
    fn test_divert_stages_original_bytes() {
        let sink = DeadLetterSink::new("company_dlq");
        let mut tx = transaction(b"<Message><Body>oops</Message>");
        let err = Error::Unmarshal {
            message: "mismatched closing tag".to_string(),
            payload: Bytes::from_static(b"<Message><Body>oops</Message>"),
        };

        let envelope = sink.divert(&mut tx, &FailureInfo::new(&err, Stage::Validating));

        assert_eq!(tx.staged().len(), 1);
        let (destination, message) = &tx.staged()[0];
        assert_eq!(destination, "company_dlq");
        assert_eq!(message.payload.as_ref(), b"<Message><Body>oops</Message>");
        assert_eq!(message.headers, envelope.headers);
    }

    #[test]
    fn test_failure_headers() {
        let sink = DeadLetterSink::new("company_dlq");
        let mut tx = transaction(b"<Message/>");
        let err = Error::Mapping {
            field: "hireDate".to_string(),
            message: "invalid date '2023-02-30'".to_string(),
        };

        let envelope = sink.divert(&mut tx, &FailureInfo::new(&err, Stage::Mapping));

        assert_eq!(envelope.header(EXCEPTION_CAUGHT), Some(err.to_string().as_str()));
        assert_eq!(envelope.header(FAILURE_KIND), Some("MappingError"));
        assert_eq!(envelope.header(FAILED_STAGE), Some("Mapping"));
        assert!(envelope.header(FAILED_AT).unwrap().ends_with('Z'));
        assert_eq!(envelope.header("origin"), Some("hr-system"));
    }

    #[test]
    fn test_non_utf8_header_carried_unchanged() {
        let sink = DeadLetterSink::new("company_dlq");
        let mut tx = transaction(b"<Message/>");
        let err = Error::SchemaValidation {
            message: "missing element 'email'".to_string(),
            payload: Bytes::from_static(b"<Message/>"),
        };

        let envelope = sink.divert(&mut tx, &FailureInfo::new(&err, Stage::Validating));

        assert_eq!(envelope.headers["trace"].as_ref(), &[0xc3, 0x28, 0x01]);
        assert_eq!(envelope.header("trace"), None);
    }
}
