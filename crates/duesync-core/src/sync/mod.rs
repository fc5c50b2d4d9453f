//! Calendar reconciliation: decides, per work item and per role, whether
//! to create, update, complete, or delete the mirrored event, and runs
//! those operations with single-flight protection per (owner, student).

pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod types;


pub use executor::{BatchHandle, BoxedTask, TaskSpawner, TokioSpawner};
pub use gate::{SyncGate, SyncPermit};
pub use orchestrator::SyncOrchestrator;
pub use types::{SyncAction, SyncResult, SyncRunStatus, WorkItemSource};
