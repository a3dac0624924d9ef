pub mod admission;
pub mod config;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod limits;
pub mod ops;
pub mod status;

pub use admission::{
    AdmissionController, AdmissionDecision, Rejection, RejectionReason, SweepReport, Usage,
};
pub use config::{AdmissionConfig, TrackerConfig};
pub use error::{AdmissionError, OpsError, TrackerError};
pub use keys::RateLimitKeyBuilder;
pub use lifecycle::{ExecutionLifecycle, FileOutcome, TerminalStatus};
pub use limits::LimitConfigCache;
pub use ops::{CapacityLevel, Operator, UsageReport};
pub use status::{ExecutionStatusRecord, ExecutionStatusTracker, StatusLookup};
