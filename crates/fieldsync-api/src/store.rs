//! In-memory system of record.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use fieldsync_core::models::{validate_raw, EmployeeId, EntityKind, RawRecord, Snapshot};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Canonical record sets, one per employee and kind.
#[derive(Clone, Default)]
pub struct CanonicalStore {
    records: Arc<RwLock<HashMap<EmployeeId, BTreeMap<EntityKind, Vec<RawRecord>>>>>,
}

impl CanonicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the employee's set for `kind` with `records`.
    ///
    /// The batch is checked as a whole; a rejected batch leaves the previous
    /// set untouched.
    pub async fn replace(
        &self,
        employee: &EmployeeId,
        kind: EntityKind,
        records: Vec<RawRecord>,
    ) -> Result<usize, AppError> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if &record.employee_id != employee {
                return Err(AppError::bad_request(format!(
                    "Record {} belongs to {}, not {employee}",
                    record.id, record.employee_id
                )));
            }
            if !seen.insert(record.id) {
                return Err(AppError::bad_request(format!(
                    "Record {} appears twice in the {kind} batch",
                    record.id
                )));
            }
            validate_raw(kind, record)?;
        }

        let accepted = records.len();
        let mut guard = self.records.write().await;
        guard
            .entry(employee.clone())
            .or_default()
            .insert(kind, records);
        Ok(accepted)
    }

    /// Everything held for `employee`, empty when nothing was ever pushed.
    pub async fn snapshot(&self, employee: &EmployeeId) -> Result<Snapshot, AppError> {
        let guard = self.records.read().await;
        let mut snapshot = Snapshot::default();
        if let Some(kinds) = guard.get(employee) {
            for (kind, records) in kinds {
                for record in records {
                    snapshot.push_raw(*kind, record.clone())?;
                }
            }
        }
        Ok(snapshot)
    }

    pub async fn employee_count(&self) -> usize {
        self.records.read().await.len()
    }
}
