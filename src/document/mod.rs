pub mod parser;
pub mod schema;
pub mod types;
pub mod validator;

pub use schema::{DocumentSchema, FieldRule, FieldType};
pub use types::{EmployeeDocument, InboundDocument, BODY_ELEMENTS};
pub use validator::SchemaValidator;
