use serde::{Deserialize, Serialize};

/// How the schema registry subject is derived for a published value.
///
/// Keying by record name rather than topic lets several record types share
/// one topic without their subjects colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectNameStrategy {
    /// `<topic>-value`
    TopicName,
    /// `<namespace>.<name>`
    RecordName,
    /// `<topic>-<namespace>.<name>`
    #[default]
    TopicRecordName,
}

impl SubjectNameStrategy {
    pub fn subject(&self, topic: &str, record_full_name: &str) -> String {
        match self {
            SubjectNameStrategy::TopicName => format!("{}-value", topic),
            SubjectNameStrategy::RecordName => record_full_name.to_string(),
            SubjectNameStrategy::TopicRecordName => format!("{}-{}", topic, record_full_name),
        }
    }
}
