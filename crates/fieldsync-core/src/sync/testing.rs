//! In-memory backend that records every call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::{oneshot, Notify};

use super::backend::{BatchAck, SyncBackend};
use crate::models::{EmployeeId, EntityKind, RawRecord, Snapshot};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Push(EntityKind, usize),
    FetchSnapshot,
}

#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<BackendCall>>,
    failing: Mutex<BTreeSet<EntityKind>>,
    stored: Mutex<BTreeMap<(EmployeeId, EntityKind), Vec<RawRecord>>>,
    offline: AtomicBool,
    snapshot_hold: Mutex<Option<oneshot::Receiver<()>>>,
    snapshot_requested: Notify,
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_kind(&self, kind: EntityKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn seed(&self, employee: &EmployeeId, kind: EntityKind, records: Vec<RawRecord>) {
        self.stored
            .lock()
            .unwrap()
            .insert((employee.clone(), kind), records);
    }

    pub fn stored(&self, employee: &EmployeeId, kind: EntityKind) -> Vec<RawRecord> {
        self.stored
            .lock()
            .unwrap()
            .get(&(employee.clone(), kind))
            .cloned()
            .unwrap_or_default()
    }

    /// Park the next `fetch_snapshot` until the returned sender fires.
    pub fn hold_snapshot(&self) -> oneshot::Sender<()> {
        let (release, hold) = oneshot::channel();
        *self.snapshot_hold.lock().unwrap() = Some(hold);
        release
    }

    /// Resolves once a held snapshot has been requested.
    pub async fn snapshot_requested(&self) {
        self.snapshot_requested.notified().await;
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

impl SyncBackend for FakeBackend {
    async fn push_batch(
        &self,
        employee: &EmployeeId,
        kind: EntityKind,
        records: &[RawRecord],
    ) -> Result<BatchAck> {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::Push(kind, records.len()));
        tokio::task::yield_now().await;

        self.check_online()?;
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(Error::Backend {
                status: 500,
                message: format!("{kind} rejected"),
            });
        }

        self.seed(employee, kind, records.to_vec());
        Ok(BatchAck {
            accepted: records.len(),
        })
    }

    async fn fetch_snapshot(&self, employee: &EmployeeId) -> Result<Snapshot> {
        self.calls.lock().unwrap().push(BackendCall::FetchSnapshot);
        let hold = self.snapshot_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            self.snapshot_requested.notify_one();
            hold.await.ok();
        }
        tokio::task::yield_now().await;

        self.check_online()?;
        let mut snapshot = Snapshot::default();
        for kind in EntityKind::PUSH_ORDER {
            for record in self.stored(employee, kind) {
                snapshot.push_raw(kind, record)?;
            }
        }
        Ok(snapshot)
    }
}
