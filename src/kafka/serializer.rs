use apache_avro::types::Value;
use apache_avro::Schema;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::registry::SchemaRegistry;
use super::subject::SubjectNameStrategy;
use crate::record::EmployeeDetails;
use crate::{Error, Result};

/// First byte of every Confluent-framed value.
pub const MAGIC_BYTE: u8 = 0;

/// Encodes canonical records as Confluent-framed Avro.
///
/// The writer schema is registered lazily, once per subject, and the id is
/// cached for the lifetime of the serializer.
pub struct AvroSerializer {
    schema: Schema,
    definition: String,
    full_name: String,
    registry: Arc<dyn SchemaRegistry>,
    strategy: SubjectNameStrategy,
    ids: Mutex<HashMap<String, u32>>,
}

impl AvroSerializer {
    pub fn new(
        definition: &str,
        registry: Arc<dyn SchemaRegistry>,
        strategy: SubjectNameStrategy,
    ) -> Result<Self> {
        let schema = Schema::parse_str(definition)
            .map_err(|e| Error::Config(format!("invalid Avro schema: {}", e)))?;
        let full_name = record_full_name(definition)?;

        Ok(Self {
            schema,
            definition: definition.to_string(),
            full_name,
            registry,
            strategy,
            ids: Mutex::new(HashMap::new()),
        })
    }

    pub fn load<P: AsRef<Path>>(
        path: P,
        registry: Arc<dyn SchemaRegistry>,
        strategy: SubjectNameStrategy,
    ) -> Result<Self> {
        let definition = std::fs::read_to_string(path.as_ref())?;
        let serializer = Self::new(&definition, registry, strategy)?;
        info!(
            path = %path.as_ref().display(),
            record = %serializer.full_name,
            "Loaded record schema"
        );
        Ok(serializer)
    }

    /// Fully qualified record name, e.g. `com.schemas.EmployeeDetails`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn subject(&self, topic: &str) -> String {
        self.strategy.subject(topic, &self.full_name)
    }

    /// Serializes `record` for `topic`, registering the schema if needed.
    pub async fn serialize(&self, topic: &str, record: &EmployeeDetails) -> Result<Vec<u8>> {
        let datum = self.encode_datum(record)?;
        let id = self.schema_id(&self.subject(topic)).await?;
        Ok(frame(id, &datum))
    }

    /// Plain Avro binary encoding, without framing.
    pub fn encode_datum(&self, record: &EmployeeDetails) -> Result<Vec<u8>> {
        let value = to_avro_value(record)?;
        if !value.validate(&self.schema) {
            return Err(Error::Serialization(format!(
                "record '{}' does not conform to schema {}",
                record.employee_id, self.full_name
            )));
        }
        apache_avro::to_avro_datum(&self.schema, value)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    async fn schema_id(&self, subject: &str) -> Result<u32> {
        if let Some(id) = self.cached_id(subject) {
            return Ok(id);
        }

        let id = self.registry.register(subject, &self.definition).await?;
        debug!(subject, id, "Caching schema id");
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subject.to_string(), id);
        Ok(id)
    }

    fn cached_id(&self, subject: &str) -> Option<u32> {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(subject)
            .copied()
    }
}

/// Prefixes an Avro datum with the magic byte and big-endian schema id.
pub fn frame(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(5 + datum.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(datum);
    framed
}

pub fn to_avro_value(record: &EmployeeDetails) -> Result<Value> {
    Ok(Value::Record(vec![
        ("employeeId".to_string(), Value::String(record.employee_id.clone())),
        ("firstName".to_string(), Value::String(record.first_name.clone())),
        ("lastName".to_string(), Value::String(record.last_name.clone())),
        ("email".to_string(), Value::String(record.email.clone())),
        ("phoneNumber".to_string(), Value::String(record.phone_number.clone())),
        ("dateOfBirth".to_string(), Value::Date(epoch_days(record.date_of_birth)?)),
        ("gender".to_string(), Value::String(record.gender.clone())),
        ("hireDate".to_string(), Value::Date(epoch_days(record.hire_date)?)),
        ("salary".to_string(), Value::Double(record.salary)),
        ("bonus".to_string(), Value::Double(record.bonus)),
        ("married".to_string(), Value::Boolean(record.married)),
        ("city".to_string(), Value::String(record.city.clone())),
    ]))
}

fn epoch_days(date: NaiveDate) -> Result<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let days = date.signed_duration_since(epoch).num_days();
    i32::try_from(days)
        .map_err(|_| Error::Serialization(format!("date {} is out of Avro range", date)))
}

fn record_full_name(definition: &str) -> Result<String> {
    let json: serde_json::Value = serde_json::from_str(definition)?;
    let name = json
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| Error::Config("Avro schema has no record name".to_string()))?;

    if name.contains('.') {
        return Ok(name.to_string());
    }
    match json.get("namespace").and_then(|n| n.as_str()) {
        Some(namespace) if !namespace.is_empty() => Ok(format!("{}.{}", namespace, name)),
        _ => Ok(name.to_string()),
    }
}
