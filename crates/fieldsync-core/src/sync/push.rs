//! Ordered push pipeline

use std::collections::BTreeSet;
use std::time::Duration;

use super::backend::SyncBackend;
use super::outcome::SyncOutcome;
use crate::models::{EmployeeId, EntityKind};
use crate::services::LocalStore;

/// Delays inserted between consecutive batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPacing {
    /// Pause before the next batch
    pub between_batches: Duration,
    /// Pause before the batch that follows receipts
    pub after_receipts: Duration,
}

impl Default for PushPacing {
    fn default() -> Self {
        Self {
            between_batches: Duration::from_millis(500),
            after_receipts: Duration::from_millis(1500),
        }
    }
}

impl PushPacing {
    /// No pauses at all.
    pub const fn none() -> Self {
        Self {
            between_batches: Duration::ZERO,
            after_receipts: Duration::ZERO,
        }
    }

    fn delay_after(&self, previous: EntityKind) -> Duration {
        if previous.carries_attachments() {
            self.after_receipts
        } else {
            self.between_batches
        }
    }
}

/// Sends each kind's full local set to the backend, one batch per kind.
pub struct PushPass<'a, B> {
    store: &'a LocalStore,
    backend: &'a B,
    pacing: PushPacing,
}

impl<'a, B: SyncBackend> PushPass<'a, B> {
    pub const fn new(store: &'a LocalStore, backend: &'a B, pacing: PushPacing) -> Self {
        Self {
            store,
            backend,
            pacing,
        }
    }

    /// Push every kind in [`EntityKind::PUSH_ORDER`].
    ///
    /// A failing kind is recorded and the pass moves on to the next one.
    pub async fn run(&self, employee: &EmployeeId) -> SyncOutcome {
        let remote_kinds = match self.store.sync_metadata(employee) {
            Ok(metadata) => metadata.remote_kinds,
            Err(error) => {
                tracing::warn!(employee = %employee, %error, "Could not read sync metadata");
                BTreeSet::new()
            }
        };

        let mut outcome = SyncOutcome::default();
        let mut previous: Option<EntityKind> = None;

        for kind in EntityKind::PUSH_ORDER {
            let records = match self.store.list_raw(kind, employee) {
                Ok(records) => records,
                Err(error) => {
                    tracing::warn!(employee = %employee, kind = %kind, %error, "Could not read local records");
                    outcome.record_failure(kind, 0, error.to_string());
                    continue;
                }
            };

            // An empty batch replaces the backend's set, so only send one when
            // the backend is known to hold records that were deleted locally.
            if records.is_empty() && !remote_kinds.contains(&kind) {
                tracing::debug!(employee = %employee, kind = %kind, "Nothing to push");
                outcome.record_skip(kind);
                continue;
            }

            if let Some(previous) = previous {
                let delay = self.pacing.delay_after(previous);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            previous = Some(kind);

            match self.backend.push_batch(employee, kind, &records).await {
                Ok(ack) => {
                    tracing::debug!(
                        employee = %employee,
                        kind = %kind,
                        records = records.len(),
                        accepted = ack.accepted,
                        "Pushed batch"
                    );
                    outcome.record_success(kind, records.len());
                }
                Err(error) => {
                    tracing::warn!(
                        employee = %employee,
                        kind = %kind,
                        records = records.len(),
                        %error,
                        "Push failed"
                    );
                    outcome.record_failure(kind, records.len(), error.to_string());
                }
            }
        }

        tracing::info!(employee = %employee, summary = %outcome.summary(), "Push pass finished");
        outcome
    }
}
