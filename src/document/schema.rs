//! Structural schema for inbound documents.
//!
//! The schema is supplied at deployment as a JSON file and is fixed for the
//! lifetime of the process. It describes the element layout (root, record and
//! tolerated siblings) and one rule per record field.
//!
//! ```json
//! {
//!   "root": "Message",
//!   "record": "Body",
//!   "optional_elements": ["Header"],
//!   "fields": [
//!     { "name": "empId", "type": "string", "min_length": 1 },
//!     { "name": "salary", "type": "decimal" }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentSchema {
    pub root: String,
    pub record: String,
    #[serde(default)]
    pub optional_elements: Vec<String>,
    pub fields: Vec<FieldRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Regular expression the whole value must match.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub enumeration: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Date,
    Decimal,
    Integer,
    Boolean,
}

impl DocumentSchema {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let schema = Self::from_json(&contents)?;
        info!(
            path = %path.as_ref().display(),
            root = %schema.root,
            fields = schema.fields.len(),
            "Loaded document schema"
        );
        Ok(schema)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let schema: DocumentSchema = serde_json::from_str(json)?;
        if schema.fields.is_empty() {
            return Err(Error::Config(
                "document schema declares no fields".to_string(),
            ));
        }
        Ok(schema)
    }

    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn default_required() -> bool {
    true
}
