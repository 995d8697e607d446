//! Synchronization between the local store and the backend.

mod backend;
mod coordinator;
mod gate;
mod http;
mod outcome;
mod pull;
mod push;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BatchAck, SyncBackend};
pub use coordinator::{PullStatus, SyncCoordinator, SyncReport, SyncRun, SyncTrigger};
pub use gate::{SyncGate, SyncSession};
pub use http::HttpSyncBackend;
pub use outcome::{PartialSyncError, SyncOutcome};
pub use pull::{PullPass, PullSummary};
pub use push::{PushPacing, PushPass};
