pub mod memory;
pub mod scoped;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use scoped::ScopedStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::LocalStore;
