use bytes::Bytes;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use super::parser::{parse_record, Layout, RawRecord};
use super::schema::{DocumentSchema, FieldRule, FieldType};
use super::types::{EmployeeDocument, InboundDocument, BODY_ELEMENTS};
use crate::{Error, Result};

/// Lexical forms of the built-in field types.
struct Lexical {
    date: Regex,
    decimal: Regex,
    integer: Regex,
}

impl Lexical {
    fn new() -> Result<Self> {
        Ok(Self {
            date: compile(r"-?\d{4,}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])(Z|[+-]\d{2}:\d{2})?")?,
            decimal: compile(r"[+-]?(\d+(\.\d*)?|\.\d+)")?,
            integer: compile(r"[+-]?\d+")?,
        })
    }
}

/// Validates raw documents against a [`DocumentSchema`] and produces the
/// typed [`InboundDocument`] view.
///
/// Validation is all-or-nothing: either the whole document conforms or the
/// call fails with every violation listed.
pub struct SchemaValidator {
    schema: DocumentSchema,
    patterns: HashMap<String, Regex>,
    lexical: Lexical,
}

impl SchemaValidator {
    /// Builds a validator, rejecting schemas the typed view cannot work with.
    pub fn new(schema: DocumentSchema) -> Result<Self> {
        for element in BODY_ELEMENTS {
            if schema.field(element).is_none() {
                return Err(Error::Config(format!(
                    "document schema does not declare element '{}'",
                    element
                )));
            }
        }

        let mut patterns = HashMap::new();
        for rule in &schema.fields {
            if let Some(pattern) = &rule.pattern {
                patterns.insert(rule.name.clone(), compile(pattern)?);
            }
        }

        Ok(Self {
            schema,
            patterns,
            lexical: Lexical::new()?,
        })
    }

    #[instrument(skip_all, fields(bytes = raw.len()))]
    pub fn validate(&self, raw: Bytes) -> Result<InboundDocument> {
        let xml = match std::str::from_utf8(&raw) {
            Ok(xml) => xml,
            Err(e) => return Err(unmarshal(format!("payload is not UTF-8: {}", e), &raw)),
        };

        let layout = Layout {
            root: &self.schema.root,
            record: &self.schema.record,
            optional: &self.schema.optional_elements,
        };
        let fields = parse_record(xml, layout).map_err(|message| unmarshal(message, &raw))?;

        let violations = self.check(&fields);
        if !violations.is_empty() {
            debug!(count = violations.len(), "Document failed schema validation");
            return Err(Error::SchemaValidation {
                message: violations.join("; "),
                payload: raw,
            });
        }

        let body = lift(&fields).map_err(|message| unmarshal(message, &raw))?;
        Ok(InboundDocument::new(raw, body))
    }

    fn check(&self, fields: &RawRecord) -> Vec<String> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();

        for (name, value) in fields {
            if !seen.insert(name.as_str()) {
                violations.push(format!("element '{}' appears more than once", name));
                continue;
            }
            match self.schema.field(name) {
                Some(rule) => self.check_value(rule, value, &mut violations),
                None => violations.push(format!("element '{}' is not allowed", name)),
            }
        }

        for rule in &self.schema.fields {
            if rule.required && !seen.contains(rule.name.as_str()) {
                violations.push(format!("missing required element '{}'", rule.name));
            }
        }

        violations
    }

    fn check_value(&self, rule: &FieldRule, value: &str, violations: &mut Vec<String>) {
        let name = &rule.name;
        let collapsed = value.trim();

        let lexical_ok = match rule.field_type {
            FieldType::String => true,
            FieldType::Date => self.lexical.date.is_match(collapsed),
            FieldType::Decimal => self.lexical.decimal.is_match(collapsed),
            FieldType::Integer => self.lexical.integer.is_match(collapsed),
            FieldType::Boolean => matches!(collapsed, "true" | "false" | "1" | "0"),
        };
        if !lexical_ok {
            violations.push(format!(
                "value '{}' of element '{}' is not a valid {:?}",
                value, name, rule.field_type
            ));
            return;
        }
        if matches!(rule.field_type, FieldType::Decimal)
            && !collapsed.parse::<f64>().is_ok_and(f64::is_finite)
        {
            violations.push(format!(
                "value '{}' of element '{}' is out of range for a double",
                value, name
            ));
            return;
        }

        let checked = match rule.field_type {
            FieldType::String => value,
            _ => collapsed,
        };
        let length = checked.chars().count();

        if let Some(min) = rule.min_length {
            if length < min {
                violations.push(format!(
                    "element '{}' is shorter than {} characters",
                    name, min
                ));
            }
        }
        if let Some(max) = rule.max_length {
            if length > max {
                violations.push(format!(
                    "element '{}' is longer than {} characters",
                    name, max
                ));
            }
        }
        if let Some(pattern) = self.patterns.get(name) {
            if !pattern.is_match(checked) {
                violations.push(format!(
                    "value '{}' of element '{}' does not match its pattern",
                    value, name
                ));
            }
        }
        if let Some(allowed) = &rule.enumeration {
            if !allowed.iter().any(|a| a == checked) {
                violations.push(format!(
                    "value '{}' of element '{}' is not one of [{}]",
                    value,
                    name,
                    allowed.join(", ")
                ));
            }
        }
    }
}

/// Lifts checked text values into the typed view.
fn lift(fields: &RawRecord) -> std::result::Result<EmployeeDocument, String> {
    let values: HashMap<&str, &str> = fields
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    let text = |name: &str| -> std::result::Result<String, String> {
        values
            .get(name)
            .map(|v| v.to_string())
            .ok_or_else(|| format!("element '{}' is required by the record layout", name))
    };
    let decimal = |name: &str| -> std::result::Result<f64, String> {
        let raw = text(name)?;
        raw.trim()
            .parse::<f64>()
            .map_err(|e| format!("element '{}': {}", name, e))
    };
    let boolean = |name: &str| -> std::result::Result<bool, String> {
        match text(name)?.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(format!("element '{}': '{}' is not a boolean", name, other)),
        }
    };

    Ok(EmployeeDocument {
        emp_id: text("empId")?,
        first_name: text("firstName")?,
        last_name: text("lastName")?,
        email: text("email")?,
        phone: text("phone")?,
        date_of_birth: text("dateOfBirth")?.trim().to_string(),
        gender: text("gender")?,
        hire_date: text("hireDate")?.trim().to_string(),
        salary: decimal("salary")?,
        bonus: decimal("bonus")?,
        married: boolean("married")?,
        city: text("city")?,
    })
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", pattern, e)))
}

fn unmarshal(message: String, raw: &Bytes) -> Error {
    Error::Unmarshal {
        message,
        payload: raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const SCHEMA: &str = include_str!("../../schemas/company.schema.json");

    fn validator() -> SchemaValidator {
        SchemaValidator::new(DocumentSchema::from_json(SCHEMA).unwrap()).unwrap()
    }

    fn document(body: &str) -> Bytes {
        Bytes::from(format!(
            "<?xml version=\"1.0\"?><Message><Body>{}</Body></Message>",
            body
        ))
    }

    const VALID_BODY: &str = "<empId>E1001</empId>\
        <firstName>Jane</firstName>\
        <lastName>Smith</lastName>\
        <email>jane.smith@example.com</email>\
        <phone>+1-555-0100</phone>\
        <dateOfBirth>1990-04-12</dateOfBirth>\
        <gender>Female</gender>\
        <hireDate>2015-06-01</hireDate>\
        <salary>85000.50</salary>\
        <bonus>5000</bonus>\
        <married>true</married>\
        <city>Springfield</city>";

    #[test]
    fn test_valid_document() {
        let raw = document(VALID_BODY);
        let doc = validator().validate(raw.clone()).unwrap();

        assert_eq!(doc.raw(), &raw);
        let body = doc.body();
        assert_eq!(body.emp_id, "E1001");
        assert_eq!(body.first_name, "Jane");
        assert_eq!(body.date_of_birth, "1990-04-12");
        assert_eq!(body.salary, 85000.50);
        assert_eq!(body.bonus, 5000.0);
        assert!(body.married);
    }

    #[test]
    fn test_missing_required_element() {
        let raw = document(&VALID_BODY.replace("<email>jane.smith@example.com</email>", ""));
        let err = validator().validate(raw.clone()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaValidation);
        assert!(err.to_string().contains("missing required element 'email'"));
        assert_eq!(err.payload(), Some(&raw));
    }

    #[test]
    fn test_all_violations_reported() {
        let body = VALID_BODY
            .replace("85000.50", "lots")
            .replace("<married>true</married>", "<married>yes</married>")
            .replace("</city>", "</city><nickname>JJ</nickname>");
        let err = validator().validate(document(&body)).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("'salary'"));
        assert!(message.contains("'married'"));
        assert!(message.contains("'nickname' is not allowed"));
    }

    #[test]
    fn test_decimal_overflow_rejected() {
        let huge = format!("1{}", "0".repeat(400));
        let body = VALID_BODY.replace("85000.50", &huge);
        let err = validator().validate(document(&body)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaValidation);
        assert!(err.to_string().contains("'salary' is out of range"));
    }

    #[test]
    fn test_duplicate_element() {
        let body = format!("{}<city>Shelbyville</city>", VALID_BODY);
        let err = validator().validate(document(&body)).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_enumeration_and_pattern() {
        let body = VALID_BODY
            .replace("Female", "Unknown")
            .replace("jane.smith@example.com", "not-an-email");
        let err = validator().validate(document(&body)).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("'gender' is not one of"));
        assert!(message.contains("'email' does not match"));
    }

    #[test]
    fn test_date_lexical_only() {
        // Calendar validity is checked by the mapper, not here.
        let body = VALID_BODY.replace("1990-04-12", "2023-02-30");
        assert!(validator().validate(document(&body)).is_ok());

        let body = VALID_BODY.replace("1990-04-12", "12/04/1990");
        let err = validator().validate(document(&body)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaValidation);
    }

    #[test]
    fn test_malformed_xml_is_unmarshal() {
        let raw = Bytes::from_static(b"<Message><Body><empId>E1</Body></Message>");
        let err = validator().validate(raw.clone()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unmarshal);
        assert_eq!(err.payload(), Some(&raw));
    }

    #[test]
    fn test_non_utf8_is_unmarshal() {
        let raw = Bytes::from_static(&[0x3c, 0xff, 0xfe, 0x3e]);
        let err = validator().validate(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unmarshal);
    }

    #[test]
    fn test_schema_must_cover_record_layout() {
        let schema = DocumentSchema::from_json(
            r#"{"root": "Message", "record": "Body", "fields": [{ "name": "empId", "type": "string" }]}"#,
        )
        .unwrap();
        assert!(matches!(SchemaValidator::new(schema), Err(Error::Config(_))));
    }
}
