pub mod commit;
pub mod engine;
pub mod scheduler;
pub mod types;

pub use commit::LocalCommit;
pub use engine::SyncEngine;
pub use scheduler::{SchedulerOptions, SyncScheduler};
pub use types::{
    EngineOptions, SyncErrorCallback, SyncErrorEvent, SyncErrorKind, SyncOutcome, SyncPhase,
    SyncReport, SyncState, SyncStateCallback,
};
