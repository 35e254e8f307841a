use std::collections::HashSet;

use crate::{Error, ErrorKind};

/// Kinds that are attributable to the message itself and get dead-lettered.
pub const DEFAULT_DIVERTIBLE: [ErrorKind; 4] = [
    ErrorKind::SchemaValidation,
    ErrorKind::Unmarshal,
    ErrorKind::Mapping,
    ErrorKind::Serialization,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send the original message to the dead-letter queue and commit.
    Divertible,
    /// Roll back and let the queue redeliver.
    Fatal,
}

/// Decides whether a processing failure is handled by diversion or aborts
/// the transaction.
#[derive(Debug, Clone)]
pub struct ExceptionClassifier {
    divertible: HashSet<ErrorKind>,
}

impl ExceptionClassifier {
    pub fn new() -> Self {
        Self::with_divertible(DEFAULT_DIVERTIBLE)
    }

    /// Classifier diverting exactly `kinds`. `Shutdown` is always fatal.
    pub fn with_divertible(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            divertible: kinds
                .into_iter()
                .filter(|kind| *kind != ErrorKind::Shutdown)
                .collect(),
        }
    }

    pub fn classify(&self, err: &Error) -> Disposition {
        if self.divertible.contains(&err.kind()) {
            Disposition::Divertible
        } else {
            Disposition::Fatal
        }
    }
}

impl Default for ExceptionClassifier {
    fn default() -> Self {
        Self::new()
    }
}
