pub mod config;
pub mod error;
pub mod types;

pub mod dirty;
pub mod events;
pub mod mapper;
pub mod merge;
pub mod normalize;
pub mod remote;
pub mod storage;
pub mod sync;

pub use error::{EngineError, RemoteError, RemoteErrorKind, Result, StorageError};
pub use sync::{EngineOptions, SyncEngine, SyncReport, SyncScheduler};
pub use types::{ProfileScope, Record, RecordId};
