pub mod execution_context;
pub mod execution_status;
pub mod file_execution;
pub mod org_limit;
pub mod util;

pub use execution_context::ExecutionContext;
pub use execution_status::{ExecutionStatus, InvalidStatusValue, StatusValue};
pub use file_execution::{FileExecutionRecord, InvalidTransition, NewFileExecution};
pub use org_limit::OrgLimit;

pub mod telemetry;
