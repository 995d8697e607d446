//! Aggregate result of one push pass

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::models::EntityKind;

/// Per-kind result of a push pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Kinds a batch was sent for, in push order
    pub attempted_types: Vec<EntityKind>,
    pub succeeded: BTreeSet<EntityKind>,
    /// Failed kinds with the error message for each
    pub failed: BTreeMap<EntityKind, String>,
    /// Kinds with nothing to send
    pub skipped: Vec<EntityKind>,
    /// Records sent per attempted kind
    pub batch_sizes: BTreeMap<EntityKind, usize>,
}

impl SyncOutcome {
    pub(crate) fn record_success(&mut self, kind: EntityKind, records: usize) {
        self.attempted_types.push(kind);
        self.batch_sizes.insert(kind, records);
        self.succeeded.insert(kind);
    }

    pub(crate) fn record_failure(&mut self, kind: EntityKind, records: usize, message: String) {
        self.attempted_types.push(kind);
        self.batch_sizes.insert(kind, records);
        self.failed.insert(kind, message);
    }

    pub(crate) fn record_skip(&mut self, kind: EntityKind) {
        self.skipped.push(kind);
    }

    /// True when some kinds pushed and others failed.
    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failed.is_empty()
    }

    /// True when no attempted kind failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when batches were attempted and every one failed.
    pub fn nothing_synced(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    /// Total records accepted by the backend.
    pub fn records_pushed(&self) -> usize {
        self.succeeded
            .iter()
            .filter_map(|kind| self.batch_sizes.get(kind))
            .sum()
    }

    /// One-line description suitable for a status message.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.succeeded.is_empty() {
            let kinds: Vec<String> = self.succeeded.iter().map(ToString::to_string).collect();
            parts.push(format!("pushed {}", kinds.join(", ")));
        }
        if !self.failed.is_empty() {
            let kinds: Vec<String> = self
                .failed
                .iter()
                .map(|(kind, message)| format!("{kind} ({message})"))
                .collect();
            parts.push(format!("failed {}", kinds.join(", ")));
        }
        if parts.is_empty() {
            return "nothing to push".to_string();
        }

        parts.join("; ")
    }
}

/// Some record kinds reached the backend while others did not.
#[derive(Debug, Clone, Error)]
#[error("Partially synced: {}", .outcome.summary())]
pub struct PartialSyncError {
    pub outcome: SyncOutcome,
}

impl PartialSyncError {
    /// Kinds that failed, in push order.
    pub fn failed_kinds(&self) -> Vec<EntityKind> {
        self.outcome.failed.keys().copied().collect()
    }
}
