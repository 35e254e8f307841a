pub mod mapper;
pub mod types;

pub use mapper::RecordMapper;
pub use types::EmployeeDetails;
