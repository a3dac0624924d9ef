pub mod error;
pub mod memory;
pub mod postgres;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::{MemoryFileExecutionStore, MemoryOrgLimitStore};
pub use postgres::PgStore;
pub use types::{FileExecutionStore, OrgLimitStore};
