use chrono::NaiveDate;
use tracing::trace;

use super::types::EmployeeDetails;
use crate::document::EmployeeDocument;
use crate::{Error, Result};

/// Maps validated documents onto the canonical record.
///
/// Stateless; the only failure is a date that is lexically valid but does
/// not exist on the calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper;

impl RecordMapper {
    pub fn new() -> Self {
        Self
    }

    pub fn map(&self, doc: &EmployeeDocument) -> Result<EmployeeDetails> {
        let record = EmployeeDetails {
            employee_id: doc.emp_id.clone(),
            first_name: doc.first_name.clone(),
            last_name: doc.last_name.clone(),
            email: doc.email.clone(),
            phone_number: doc.phone.clone(),
            date_of_birth: parse_date("dateOfBirth", &doc.date_of_birth)?,
            gender: doc.gender.clone(),
            hire_date: parse_date("hireDate", &doc.hire_date)?,
            salary: doc.salary,
            bonus: doc.bonus,
            married: doc.married,
            city: doc.city.clone(),
        };
        trace!(employee_id = %record.employee_id, "Mapped employee record");
        Ok(record)
    }
}

/// Parses an `xs:date` value, dropping any zone suffix.
fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let date_part = strip_zone(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| Error::Mapping {
        field: field.to_string(),
        message: format!("'{}' is not a calendar date: {}", value, e),
    })
}

fn strip_zone(value: &str) -> &str {
    let value = value.strip_suffix('Z').unwrap_or(value);
    // A zone offset is the trailing "+hh:mm" or "-hh:mm"; the date itself is
    // at least ten characters, so the sign can't be confused with a separator.
    if value.len() > 10 && value.is_char_boundary(value.len() - 6) {
        let (date, zone) = value.split_at(value.len() - 6);
        if zone.starts_with(|c: char| c == '+' || c == '-') && zone.as_bytes()[3] == b':' {
            return date;
        }
    }
    value
}
