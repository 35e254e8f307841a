use bytes::Bytes;

/// Body elements the typed view is built from, in document order.
pub const BODY_ELEMENTS: [&str; 12] = [
    "empId",
    "firstName",
    "lastName",
    "email",
    "phone",
    "dateOfBirth",
    "gender",
    "hireDate",
    "salary",
    "bonus",
    "married",
    "city",
];

/// Typed view of a validated employee document.
///
/// Dates stay in their lexical form; turning them into calendar dates is the
/// mapper's job.
#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeDocument {
    pub emp_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub gender: String,
    pub hire_date: String,
    pub salary: f64,
    pub bonus: f64,
    pub married: bool,
    pub city: String,
}

/// A received document: the untouched payload plus its parsed view.
#[derive(Debug, Clone)]
pub struct InboundDocument {
    raw: Bytes,
    body: EmployeeDocument,
}

impl InboundDocument {
    pub fn new(raw: Bytes, body: EmployeeDocument) -> Self {
        Self { raw, body }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn body(&self) -> &EmployeeDocument {
        &self.body
    }
}
