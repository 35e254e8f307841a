//! Schema registry clients.
//!
//! [`HttpSchemaRegistry`] speaks the Confluent REST API;
//! [`MemorySchemaRegistry`] keeps everything in process for tests and local
//! runs.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use crate::{Error, Result};

const SCHEMA_REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Registers `schema` under `subject` and returns its global id.
    ///
    /// Registering a schema that already exists returns the existing id.
    async fn register(&self, subject: &str, schema: &str) -> Result<u32>;
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSchemaRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    #[instrument(skip(self, schema), fields(registry = %self.base_url))]
    async fn register(&self, subject: &str, schema: &str) -> Result<u32> {
        let url = format!("{}/subjects/{}/versions", self.base_url, subject);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, SCHEMA_REGISTRY_CONTENT_TYPE)
            .json(&RegisterRequest { schema })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: RegisterResponse = response.json().await?;
            info!(subject, id = body.id, "Registered schema");
            return Ok(body.id);
        }

        let detail = response.text().await.unwrap_or_default();
        match status {
            // Incompatible or invalid schema: the record can't be written.
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => Err(Error::Serialization(
                format!("schema registry rejected subject '{}': {}", subject, detail),
            )),
            _ => Err(Error::Transport(format!(
                "schema registry returned {} for subject '{}': {}",
                status, subject, detail
            ))),
        }
    }
}

#[derive(Default)]
struct MemoryRegistryState {
    ids: HashMap<String, u32>,
    subjects: HashMap<String, Vec<u32>>,
    rejected: HashSet<String>,
    unavailable: bool,
}

/// In-process registry with failure switches.
#[derive(Clone, Default)]
pub struct MemorySchemaRegistry {
    state: Arc<Mutex<MemoryRegistryState>>,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every registration under `subject` fail as incompatible.
    pub fn reject_subject(&self, subject: impl Into<String>) {
        self.lock().rejected.insert(subject.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Subjects that have at least one registered version.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.lock().subjects.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SchemaRegistry for MemorySchemaRegistry {
    async fn register(&self, subject: &str, schema: &str) -> Result<u32> {
        let mut state = self.lock();

        if state.unavailable {
            return Err(Error::Transport("schema registry unavailable".to_string()));
        }
        if state.rejected.contains(subject) {
            return Err(Error::Serialization(format!(
                "schema being registered is incompatible with an earlier schema for subject '{}'",
                subject
            )));
        }

        let next_id = state.ids.len() as u32 + 1;
        let id = *state.ids.entry(schema.to_string()).or_insert(next_id);
        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }
        debug!(subject, id, "Registered schema in memory");
        Ok(id)
    }
}
