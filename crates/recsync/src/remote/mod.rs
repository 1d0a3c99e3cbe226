pub mod memory;
pub mod types;

pub use memory::MemoryRemote;
pub use types::{AuditAction, AuditEntry, RemoteBackend, RemoteChange};
