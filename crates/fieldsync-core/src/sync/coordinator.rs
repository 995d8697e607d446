//! Push-then-pull orchestration
//!
//! Every trigger (app launch, manual refresh, post-edit push) funnels through
//! one [`SyncCoordinator`]. A trigger that arrives while a run is active is
//! dropped without touching the network.

use std::sync::Arc;

use tokio::sync::watch;

use super::backend::SyncBackend;
use super::gate::{SyncGate, SyncSession};
use super::outcome::{PartialSyncError, SyncOutcome};
use super::pull::{PullPass, PullSummary};
use super::push::{PushPacing, PushPass};
use crate::models::EmployeeId;
use crate::services::LocalStore;
use crate::state::SyncState;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Call site that requested a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// App launch hydration
    InitialLoad,
    /// User-initiated refresh
    Manual,
    /// Push after a local create/update/delete
    PostMutation,
}

impl SyncTrigger {
    /// Whether a pull follows the push for this trigger.
    pub const fn pulls(self) -> bool {
        matches!(self, Self::InitialLoad | Self::Manual)
    }
}

/// What happened to the pull half of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullStatus {
    /// Trigger never pulls
    NotRequested,
    /// Snapshot applied; see [`PullSummary::kept_local`] for kinds left alone
    Applied(PullSummary),
    Failed(String),
}

/// Result of one completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub employee_id: EmployeeId,
    pub push: SyncOutcome,
    pub pull: PullStatus,
    /// Completion time (Unix ms)
    pub finished_at: i64,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.push.is_clean() && !matches!(self.pull, PullStatus::Failed(_))
    }
}

/// Outcome of asking the coordinator to sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun {
    /// Another run was active; nothing was done
    Skipped,
    Completed(SyncReport),
}

impl SyncRun {
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Skipped => None,
            Self::Completed(report) => Some(report),
        }
    }
}

/// Serializes push/pull runs between the local store and a backend.
pub struct SyncCoordinator<B> {
    inner: Arc<CoordinatorInner<B>>,
}

struct CoordinatorInner<B> {
    store: LocalStore,
    backend: B,
    pacing: PushPacing,
    gate: SyncGate,
    state: watch::Sender<SyncState>,
}

impl<B> Clone for SyncCoordinator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: SyncBackend> SyncCoordinator<B> {
    pub fn new(store: LocalStore, backend: B, pacing: PushPacing) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                backend,
                pacing,
                gate: SyncGate::default(),
                state,
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Whether a run currently holds the gate.
    pub fn is_syncing(&self) -> bool {
        self.inner.gate.is_active()
    }

    /// App-launch sync: push, then pull. Failures are logged, never surfaced.
    pub async fn initial_load_sync(&self, employee: &EmployeeId) -> SyncRun {
        match self.inner.store.sync_metadata(employee) {
            Ok(metadata) if metadata.needs_reconcile() => {
                tracing::info!(
                    employee = %employee,
                    kinds = ?metadata.unsynced_kinds,
                    "Re-pushing kinds left unsynced by an earlier run"
                );
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(employee = %employee, %error, "Could not read sync metadata"),
        }

        let run = self.run(employee, SyncTrigger::InitialLoad).await;
        if let Some(report) = run.report() {
            if let Err(error) = surface(report) {
                tracing::warn!(employee = %employee, %error, "Initial sync incomplete; continuing with local data");
            }
        }
        run
    }

    /// User-requested sync: push, then pull, with failures surfaced.
    ///
    /// Returns [`Error::PushFailed`] when nothing reached the backend,
    /// [`Error::PartialSync`] when only some kinds did, and
    /// [`Error::PullFailed`] when the push succeeded but the pull did not.
    pub async fn manual_sync(&self, employee: &EmployeeId) -> Result<SyncRun> {
        let run = self.run(employee, SyncTrigger::Manual).await;
        if let Some(report) = run.report() {
            surface(report)?;
        }
        Ok(run)
    }

    /// Push after a local mutation. Never pulls and never retries.
    pub async fn post_mutation_sync(&self, employee: &EmployeeId) -> Result<SyncRun> {
        let run = self.run(employee, SyncTrigger::PostMutation).await;
        if let Some(report) = run.report() {
            surface(report)?;
        }
        Ok(run)
    }

    async fn run(&self, employee: &EmployeeId, trigger: SyncTrigger) -> SyncRun {
        let inner = &*self.inner;
        let Some(session) = inner.gate.try_begin() else {
            tracing::debug!(employee = %employee, ?trigger, "Sync already running; trigger ignored");
            return SyncRun::Skipped;
        };
        let active = ActiveRun::begin(session, &inner.state, trigger);
        tracing::info!(employee = %employee, ?trigger, "Sync started");

        // Taken before the push reads anything, so any later local edit shows up.
        let baseline = trigger
            .pulls()
            .then(|| inner.store.change_markers(employee));

        let push = PushPass::new(&inner.store, &inner.backend, inner.pacing)
            .run(employee)
            .await;
        if let Err(error) = inner.store.record_push(employee, &push) {
            tracing::warn!(employee = %employee, %error, "Could not record push metadata");
        }

        let pull = match baseline {
            None => PullStatus::NotRequested,
            Some(baseline) => {
                let pulled = match baseline {
                    Ok(baseline) => {
                        PullPass::new(&inner.store, &inner.backend)
                            .since(&baseline)
                            .keep_local(push.failed.keys().copied())
                            .run(employee)
                            .await
                    }
                    Err(error) => Err(error),
                };
                match pulled {
                    Ok(summary) => PullStatus::Applied(summary),
                    Err(error) => {
                        tracing::warn!(employee = %employee, %error, "Pull failed");
                        PullStatus::Failed(error.to_string())
                    }
                }
            }
        };

        let report = SyncReport {
            trigger,
            employee_id: employee.clone(),
            push,
            pull,
            finished_at: unix_millis_now(),
        };

        active.finish(&report);
        tracing::info!(
            employee = %employee,
            ?trigger,
            success = report.is_success(),
            "Sync finished"
        );
        SyncRun::Completed(report)
    }
}

/// The gate and published state of one run.
///
/// Dropping it without [`ActiveRun::finish`] (panic or cancelled future) releases
/// the gate and resets the state to [`SyncState::Idle`].
struct ActiveRun<'a> {
    session: Option<SyncSession<'a>>,
    state: &'a watch::Sender<SyncState>,
}

impl<'a> ActiveRun<'a> {
    fn begin(
        session: SyncSession<'a>,
        state: &'a watch::Sender<SyncState>,
        trigger: SyncTrigger,
    ) -> Self {
        state.send_replace(SyncState::Syncing(trigger));
        Self {
            session: Some(session),
            state,
        }
    }

    /// Release the gate, then publish the report.
    fn finish(mut self, report: &SyncReport) {
        drop(self.session.take());
        self.state.send_replace(SyncState::Done(report.clone()));
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.state.send_replace(SyncState::Idle);
        }
    }
}

/// Map a finished report to the error a caller should see.
fn surface(report: &SyncReport) -> Result<()> {
    if report.push.nothing_synced() {
        return Err(Error::PushFailed(report.push.clone()));
    }
    if !report.push.is_clean() {
        return Err(PartialSyncError {
            outcome: report.push.clone(),
        }
        .into());
    }
    if let PullStatus::Failed(message) = &report.pull {
        return Err(Error::PullFailed(message.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyEntry, EntityKind, LocalRecord, Receipt, Trip};
    use crate::sync::testing::{BackendCall, FakeBackend};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn employee() -> EmployeeId {
        EmployeeId::new("emp-1").unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn coordinator() -> SyncCoordinator<FakeBackend> {
        SyncCoordinator::new(
            LocalStore::open_in_memory().unwrap(),
            FakeBackend::default(),
            PushPacing::none(),
        )
    }

    #[tokio::test]
    async fn post_mutation_sync_never_pulls() {
        let coordinator = coordinator();
        coordinator
            .store()
            .create(&employee(), Trip::new(day(4), "Office", "Site", 6.0))
            .unwrap();

        let run = coordinator.post_mutation_sync(&employee()).await.unwrap();

        let report = run.report().unwrap();
        assert_eq!(report.pull, PullStatus::NotRequested);
        assert_eq!(
            coordinator.backend().calls(),
            vec![BackendCall::Push(EntityKind::Trip, 1)]
        );
        assert!(!coordinator
            .backend()
            .calls()
            .contains(&BackendCall::FetchSnapshot));
    }

    #[tokio::test]
    async fn manual_sync_pushes_then_pulls() {
        let coordinator = coordinator();
        coordinator
            .store()
            .create(&employee(), Receipt::new(day(4), "Cafe", "meals", 1_200))
            .unwrap();

        let run = coordinator.manual_sync(&employee()).await.unwrap();

        assert_eq!(
            coordinator.backend().calls(),
            vec![
                BackendCall::Push(EntityKind::Receipt, 1),
                BackendCall::FetchSnapshot
            ]
        );
        assert!(matches!(
            run.report().unwrap().pull,
            PullStatus::Applied(ref summary) if summary.total() == 1
        ));
        assert!(matches!(coordinator.state(), SyncState::Done(ref r) if r.is_success()));
    }

    #[tokio::test]
    async fn concurrent_triggers_run_once() {
        let coordinator = coordinator();
        coordinator
            .store()
            .create(&employee(), Trip::new(day(4), "Office", "Site", 6.0))
            .unwrap();

        let employee = employee();
        let (first, second) = tokio::join!(
            coordinator.manual_sync(&employee),
            coordinator.manual_sync(&employee)
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert!(!first.is_skipped());
        assert!(second.is_skipped());
        assert_eq!(
            coordinator.backend().calls(),
            vec![
                BackendCall::Push(EntityKind::Trip, 1),
                BackendCall::FetchSnapshot
            ]
        );
        assert!(!coordinator.is_syncing());
    }

    #[tokio::test]
    async fn gate_clears_after_failed_run() {
        let coordinator = coordinator();
        coordinator
            .store()
            .create(&employee(), Trip::new(day(4), "Office", "Site", 6.0))
            .unwrap();
        coordinator.backend().set_offline(true);

        let result = coordinator.manual_sync(&employee()).await;
        assert!(matches!(result, Err(Error::PushFailed(_))));
        assert!(!coordinator.is_syncing());

        coordinator.backend().set_offline(false);
        assert!(coordinator.manual_sync(&employee()).await.is_ok());
    }

    #[tokio::test]
    async fn partial_push_is_surfaced_and_pulls_other_kinds() {
        let coordinator = coordinator();
        let store = coordinator.store();
        store
            .create(
                &employee(),
                DailyEntry {
                    date: day(4),
                    description: "Walkthrough".to_string(),
                    hours: 4.0,
                },
            )
            .unwrap();
        store
            .create(&employee(), Trip::new(day(4), "Office", "Site", 6.0))
            .unwrap();
        let receipt = store
            .create(&employee(), Receipt::new(day(4), "Hotel", "lodging", 15_900))
            .unwrap();
        coordinator.backend().fail_kind(EntityKind::Receipt);

        let error = coordinator.manual_sync(&employee()).await.unwrap_err();
        let Error::PartialSync(partial) = error else {
            panic!("expected partial sync error, got {error:?}");
        };
        assert!(partial.outcome.is_partial());
        assert_eq!(
            partial.outcome.succeeded,
            BTreeSet::from([EntityKind::DailyEntry, EntityKind::Trip])
        );
        assert_eq!(partial.failed_kinds(), vec![EntityKind::Receipt]);

        assert_eq!(
            coordinator.backend().calls().last(),
            Some(&BackendCall::FetchSnapshot)
        );
        let SyncState::Done(report) = coordinator.state() else {
            panic!("expected a finished run");
        };
        let PullStatus::Applied(summary) = report.pull else {
            panic!("expected an applied pull, got {:?}", report.pull);
        };
        assert_eq!(summary.kept_local, BTreeSet::from([EntityKind::Receipt]));
        assert!(store.get::<Receipt>(&receipt.id).unwrap().is_some());
        assert!(store.sync_metadata(&employee()).unwrap().needs_reconcile());
    }

    #[tokio::test]
    async fn failed_kind_does_not_block_hydrating_the_rest() {
        let coordinator = coordinator();
        let receipt = coordinator
            .store()
            .create(&employee(), Receipt::new(day(2), "Depot", "tools", 2_400))
            .unwrap();
        let remote = LocalRecord::new(employee(), Trip::new(day(1), "Home", "Yard", 11.0));
        coordinator.backend().seed(
            &employee(),
            EntityKind::Trip,
            vec![remote.clone().into_raw().unwrap()],
        );
        coordinator.backend().fail_kind(EntityKind::Receipt);

        let run = coordinator.initial_load_sync(&employee()).await;

        assert!(matches!(
            run.report().unwrap().pull,
            PullStatus::Applied(ref summary) if summary.kept_local.contains(&EntityKind::Receipt)
        ));
        assert_eq!(coordinator.store().get::<Trip>(&remote.id).unwrap(), Some(remote));
        assert!(coordinator.store().get::<Receipt>(&receipt.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn record_created_mid_sync_survives_the_pull() {
        let coordinator = coordinator();
        let store = coordinator.store();
        let employee = employee();
        let release = coordinator.backend().hold_snapshot();

        let (run, (entry, during)) = tokio::join!(coordinator.manual_sync(&employee), async {
            coordinator.backend().snapshot_requested().await;
            let entry = store
                .create(
                    &employee,
                    DailyEntry {
                        date: day(6),
                        description: "Site survey".to_string(),
                        hours: 2.5,
                    },
                )
                .unwrap();
            let during = coordinator.post_mutation_sync(&employee).await.unwrap();
            release.send(()).unwrap();
            (entry, during)
        });

        assert!(during.is_skipped());
        let run = run.unwrap();
        assert!(matches!(
            run.report().unwrap().pull,
            PullStatus::Applied(ref summary)
                if summary.kept_local == BTreeSet::from([EntityKind::DailyEntry])
        ));
        assert_eq!(store.get::<DailyEntry>(&entry.id).unwrap(), Some(entry));
        assert!(store.sync_metadata(&employee).unwrap().needs_reconcile());

        coordinator.backend().clear_calls();
        coordinator.manual_sync(&employee).await.unwrap();
        assert_eq!(
            coordinator.backend().calls(),
            vec![
                BackendCall::Push(EntityKind::DailyEntry, 1),
                BackendCall::FetchSnapshot
            ]
        );
        assert!(!store.sync_metadata(&employee).unwrap().needs_reconcile());
    }

    #[tokio::test]
    async fn record_edited_mid_sync_keeps_the_edit() {
        let coordinator = coordinator();
        let store = coordinator.store();
        let employee = employee();
        let trip = store
            .create(&employee, Trip::new(day(4), "Office", "Site", 6.0))
            .unwrap();
        coordinator.manual_sync(&employee).await.unwrap();

        let release = coordinator.backend().hold_snapshot();
        let (run, edited) = tokio::join!(coordinator.manual_sync(&employee), async {
            coordinator.backend().snapshot_requested().await;
            let edited = store
                .update::<Trip>(&trip.id, |trip| trip.distance_miles = 9.5)
                .unwrap();
            release.send(()).unwrap();
            edited
        });

        run.unwrap();
        assert_eq!(store.get::<Trip>(&trip.id).unwrap(), Some(edited));
        assert_eq!(
            coordinator.backend().stored(&employee, EntityKind::Trip).len(),
            1
        );
    }

    #[tokio::test]
    async fn cancelled_run_resets_state_and_gate() {
        let coordinator = coordinator();
        coordinator
            .store()
            .create(&employee(), Trip::new(day(4), "Office", "Site", 6.0))
            .unwrap();
        let employee = employee();

        {
            let run = coordinator.manual_sync(&employee);
            futures::pin_mut!(run);
            assert!(futures::poll!(run.as_mut()).is_pending());
            assert!(coordinator.is_syncing());
            assert_eq!(coordinator.state(), SyncState::Syncing(SyncTrigger::Manual));
        }

        assert!(!coordinator.is_syncing());
        assert_eq!(coordinator.state(), SyncState::Idle);
        assert!(coordinator.manual_sync(&employee).await.is_ok());
    }

    #[test]
    fn panicking_run_resets_state_and_gate() {
        let gate = SyncGate::default();
        let (state, _) = watch::channel(SyncState::Idle);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _active = ActiveRun::begin(gate.try_begin().unwrap(), &state, SyncTrigger::Manual);
            assert_eq!(*state.borrow(), SyncState::Syncing(SyncTrigger::Manual));
            panic!("pull blew up");
        }));

        assert!(result.is_err());
        assert!(!gate.is_active());
        assert_eq!(*state.borrow(), SyncState::Idle);
    }

    #[tokio::test]
    async fn first_launch_hydrates_store_from_backend() {
        let coordinator = coordinator();
        let remote = vec![
            LocalRecord::new(employee(), Trip::new(day(1), "Home", "Yard", 11.0)),
            LocalRecord::new(employee(), Trip::new(day(2), "Yard", "Client", 23.5)),
        ];
        coordinator.backend().seed(
            &employee(),
            EntityKind::Trip,
            remote
                .iter()
                .cloned()
                .map(|record| record.into_raw().unwrap())
                .collect(),
        );

        let run = coordinator.initial_load_sync(&employee()).await;

        assert!(run.report().unwrap().push.attempted_types.is_empty());
        assert_eq!(
            coordinator.backend().calls(),
            vec![BackendCall::FetchSnapshot]
        );
        assert_eq!(coordinator.store().count(EntityKind::Trip, &employee()).unwrap(), 2);
        for record in remote {
            assert_eq!(coordinator.store().get::<Trip>(&record.id).unwrap(), Some(record));
        }
    }

    #[tokio::test]
    async fn initial_load_swallows_pull_failure() {
        let coordinator = coordinator();
        coordinator.backend().set_offline(true);

        let run = coordinator.initial_load_sync(&employee()).await;
        assert!(matches!(
            run.report().unwrap().pull,
            PullStatus::Failed(_)
        ));
        assert!(!coordinator.is_syncing());
    }

    #[tokio::test]
    async fn repeated_syncs_converge_on_backend_state() {
        let coordinator = coordinator();
        let store = coordinator.store();
        let kept = store
            .create(&employee(), Trip::new(day(3), "Office", "Site", 6.0))
            .unwrap();
        let removed = store
            .create(&employee(), Trip::new(day(5), "Site", "Depot", 4.0))
            .unwrap();
        coordinator.manual_sync(&employee()).await.unwrap();

        store.delete(EntityKind::Trip, &removed.id).unwrap();
        coordinator.post_mutation_sync(&employee()).await.unwrap();
        coordinator.manual_sync(&employee()).await.unwrap();

        let backend_ids: Vec<_> = coordinator
            .backend()
            .stored(&employee(), EntityKind::Trip)
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(backend_ids, vec![kept.id]);

        let local_ids: Vec<_> = store
            .list::<Trip>(&employee(), &crate::db::RecordFilter::default())
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(local_ids, backend_ids);
    }
}
