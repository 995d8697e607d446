//! Full-state-replace pull

use std::collections::{BTreeMap, BTreeSet};

use super::backend::SyncBackend;
use crate::db::ChangeMarkers;
use crate::models::{EmployeeId, EntityKind};
use crate::services::LocalStore;
use crate::Result;

/// Per-kind counts of an applied pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Records the backend holds per kind
    pub counts: BTreeMap<EntityKind, usize>,
    /// Kinds left as they were locally; they still need a push
    pub kept_local: BTreeSet<EntityKind>,
}

impl PullSummary {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Replaces the employee's local records with the backend's canonical set.
///
/// Kinds in `keep_local`, and kinds edited locally after `baseline` was taken,
/// are left alone so a pull never drops work the backend has not seen.
pub struct PullPass<'a, B> {
    store: &'a LocalStore,
    backend: &'a B,
    baseline: Option<&'a ChangeMarkers>,
    keep_local: BTreeSet<EntityKind>,
}

impl<'a, B: SyncBackend> PullPass<'a, B> {
    pub const fn new(store: &'a LocalStore, backend: &'a B) -> Self {
        Self {
            store,
            backend,
            baseline: None,
            keep_local: BTreeSet::new(),
        }
    }

    /// Leave kinds that changed since `baseline` untouched.
    #[must_use]
    pub fn since(mut self, baseline: &'a ChangeMarkers) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Leave `kinds` untouched.
    #[must_use]
    pub fn keep_local(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.keep_local.extend(kinds);
        self
    }

    /// Fetch and apply the snapshot; every replaced kind is written in one transaction.
    pub async fn run(&self, employee: &EmployeeId) -> Result<PullSummary> {
        let baseline = match self.baseline {
            Some(baseline) => baseline.clone(),
            None => self.store.change_markers(employee)?,
        };
        let snapshot = self.backend.fetch_snapshot(employee).await?;
        let kept_local =
            self.store
                .apply_snapshot_except(employee, &snapshot, &baseline, &self.keep_local)?;

        let counts = snapshot.counts();
        if let Err(error) = self.store.record_pull(employee, &counts, &kept_local) {
            tracing::warn!(employee = %employee, %error, "Could not record pull metadata");
        }

        if !kept_local.is_empty() {
            tracing::warn!(
                employee = %employee,
                kinds = ?kept_local,
                "Kept local records the backend has not seen"
            );
        }
        tracing::info!(employee = %employee, records = snapshot.len(), "Pull pass finished");
        Ok(PullSummary { counts, kept_local })
    }
}
