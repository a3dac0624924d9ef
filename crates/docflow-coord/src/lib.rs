pub mod etcd;
pub mod memory;
pub mod types;

pub use etcd::EtcdCoordStore;
pub use memory::MemoryCoordStore;
pub use types::{CoordError, CoordinationStore, Result};
