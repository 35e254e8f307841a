use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical employee record published to the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeDetails {
    pub employee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub hire_date: NaiveDate,
    pub salary: f64,
    pub bonus: f64,
    pub married: bool,
    pub city: String,
}

impl EmployeeDetails {
    /// Partition key on the stream.
    pub fn key(&self) -> &str {
        &self.employee_id
    }
}
