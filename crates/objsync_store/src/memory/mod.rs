//! In-memory store implementations.

mod local;
mod remote;

pub use local::MemoryLocalStore;
pub use remote::MemoryRemoteStore;
