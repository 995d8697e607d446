//! Sync state published to clients.

use crate::sync::{SyncReport, SyncTrigger};

/// Coordinator state, observed through [`crate::SyncCoordinator::subscribe`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    Syncing(SyncTrigger),
    Done(SyncReport),
}

impl SyncState {
    pub const fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing(_))
    }

    /// Report of the last finished run, if any.
    pub const fn last_report(&self) -> Option<&SyncReport> {
        match self {
            Self::Done(report) => Some(report),
            _ => None,
        }
    }
}
