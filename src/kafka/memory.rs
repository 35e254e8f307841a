use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::producer::{OutboundRecord, StreamSink};
use crate::{Error, Result};

#[derive(Default)]
struct MemoryStreamState {
    records: Vec<OutboundRecord>,
    unavailable: bool,
}

/// Stream sink that keeps acknowledged records in memory.
///
/// Clones share the same log, so a test can keep a handle while the
/// publisher owns another.
#[derive(Clone, Default)]
pub struct MemoryStream {
    state: Arc<Mutex<MemoryStreamState>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every send fails like an unreachable broker.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn records(&self) -> Vec<OutboundRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StreamSink for MemoryStream {
    async fn send(&self, record: &OutboundRecord) -> Result<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(Error::Transport(format!(
                "broker unavailable for topic '{}'",
                record.topic
            )));
        }
        state.records.push(record.clone());
        Ok(())
    }
}
