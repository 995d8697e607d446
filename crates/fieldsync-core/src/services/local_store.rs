//! Shared local store used by the UI layer and the sync engine.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::db::{
    ChangeMarkers, Database, RecordFilter, RecordRepository, SqliteRecordRepository,
    SqliteSyncMetadataRepository, SyncMetadata, SyncMetadataRepository,
};
use crate::duplicate::{DuplicateGuard, DuplicateVerdict};
use crate::models::{
    EmployeeId, EntityKind, EntityPayload, LocalRecord, RawRecord, RecordId, Snapshot, Trip,
    YearMonth,
};
use crate::sync::SyncOutcome;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Thread-safe handle to the on-device record tables.
///
/// Every operation is synchronous and works with zero connectivity.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    duplicate_guard: DuplicateGuard,
}

impl LocalStore {
    /// Open a local store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "Opening local store");
        let db = Database::open(&db_path)?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory local store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            duplicate_guard: DuplicateGuard::default(),
        }
    }

    /// Replace the duplicate guard used by [`Self::create_trip_checked`].
    #[must_use]
    pub const fn with_duplicate_guard(mut self, guard: DuplicateGuard) -> Self {
        self.duplicate_guard = guard;
        self
    }

    fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let db = self
            .db
            .lock()
            .map_err(|_| Error::Database("Local store lock poisoned".to_string()))?;
        f(db.connection())
    }

    /// Persist a new record for `employee`.
    pub fn create<T: EntityPayload>(
        &self,
        employee: &EmployeeId,
        payload: T,
    ) -> Result<LocalRecord<T>> {
        payload.validate()?;
        let record = LocalRecord::new(employee.clone(), payload);
        self.with_connection(|conn| SqliteRecordRepository::new(conn).insert(&record))?;
        tracing::debug!(employee = %employee, kind = %T::KIND, id = %record.id, "Created record");
        Ok(record)
    }

    pub fn get<T: EntityPayload>(&self, id: &RecordId) -> Result<Option<LocalRecord<T>>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).get(id))
    }

    /// Apply `patch` to an existing record and persist it.
    pub fn update<T: EntityPayload>(
        &self,
        id: &RecordId,
        patch: impl FnOnce(&mut T),
    ) -> Result<LocalRecord<T>> {
        self.with_connection(|conn| {
            let repo = SqliteRecordRepository::new(conn);
            let mut record = repo
                .get::<T>(id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            patch(&mut record.payload);
            record.payload.validate()?;
            // Keep updated_at strictly increasing within the same millisecond
            record.updated_at = unix_millis_now().max(record.updated_at + 1);

            repo.save(&record)?;
            tracing::debug!(kind = %T::KIND, id = %record.id, "Updated record");
            Ok(record)
        })
    }

    /// Hard-delete a record; the next push of `kind` carries the reduced set.
    pub fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<()> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).delete(kind, id))?;
        tracing::debug!(kind = %kind, id = %id, "Deleted record");
        Ok(())
    }

    pub fn list<T: EntityPayload>(
        &self,
        employee: &EmployeeId,
        filter: &RecordFilter,
    ) -> Result<Vec<LocalRecord<T>>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).list(employee, filter))
    }

    /// All of an employee's records of `kind` in wire form.
    pub fn list_raw(&self, kind: EntityKind, employee: &EmployeeId) -> Result<Vec<RawRecord>> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).list_raw(kind, employee))
    }

    pub fn count(&self, kind: EntityKind, employee: &EmployeeId) -> Result<usize> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).count(kind, employee))
    }

    /// Per-kind record counts for `employee`.
    pub fn counts(&self, employee: &EmployeeId) -> Result<BTreeMap<EntityKind, usize>> {
        self.with_connection(|conn| {
            let repo = SqliteRecordRepository::new(conn);
            EntityKind::PUSH_ORDER
                .into_iter()
                .map(|kind| Ok((kind, repo.count(kind, employee)?)))
                .collect()
        })
    }

    /// Replace the employee's records in every table with `snapshot`.
    ///
    /// Nothing is written if the snapshot fails validation.
    pub fn apply_snapshot(&self, employee: &EmployeeId, snapshot: &Snapshot) -> Result<()> {
        snapshot.validate_for(employee)?;
        self.with_connection(|conn| SqliteRecordRepository::new(conn).replace_all(employee, snapshot))?;
        tracing::info!(employee = %employee, records = snapshot.len(), "Applied canonical snapshot");
        Ok(())
    }

    /// Snapshot of which rows exist for `employee` and how fresh they are.
    pub fn change_markers(&self, employee: &EmployeeId) -> Result<ChangeMarkers> {
        self.with_connection(|conn| SqliteRecordRepository::new(conn).change_markers(employee))
    }

    /// Apply `snapshot` to every kind except `keep_local` and any kind whose rows
    /// changed since `baseline` was taken.
    ///
    /// The comparison and the replace run under one lock, so an edit cannot land
    /// between them. Returns the kinds left untouched.
    pub fn apply_snapshot_except(
        &self,
        employee: &EmployeeId,
        snapshot: &Snapshot,
        baseline: &ChangeMarkers,
        keep_local: &BTreeSet<EntityKind>,
    ) -> Result<BTreeSet<EntityKind>> {
        snapshot.validate_for(employee)?;
        let kept = self.with_connection(|conn| {
            let repo = SqliteRecordRepository::new(conn);
            let current = repo.change_markers(employee)?;

            let mut kept = keep_local.clone();
            for kind in EntityKind::PUSH_ORDER {
                if current.get(&kind) != baseline.get(&kind) {
                    kept.insert(kind);
                }
            }
            let replace = EntityKind::PUSH_ORDER
                .into_iter()
                .filter(|kind| !kept.contains(kind))
                .collect();

            repo.replace_kinds(employee, snapshot, &replace)?;
            Ok(kept)
        })?;

        tracing::info!(
            employee = %employee,
            records = snapshot.len(),
            kept_local = ?kept,
            "Applied canonical snapshot"
        );
        Ok(kept)
    }

    /// Score `trip` against the employee's trips in the same month.
    pub fn check_trip_duplicate(
        &self,
        employee: &EmployeeId,
        trip: &Trip,
    ) -> Result<DuplicateVerdict> {
        let same_month = self.list::<Trip>(employee, &RecordFilter::month(YearMonth::of(trip.date)))?;
        Ok(self.duplicate_guard.check(employee, trip, &same_month))
    }

    /// Create a trip unless it looks like one already recorded.
    ///
    /// Returns [`Error::DuplicateCandidate`] for a flagged trip; pass `force` to
    /// insert it anyway.
    pub fn create_trip_checked(
        &self,
        employee: &EmployeeId,
        trip: Trip,
        force: bool,
    ) -> Result<LocalRecord<Trip>> {
        trip.validate()?;
        if !force {
            let verdict = self.check_trip_duplicate(employee, &trip)?;
            if verdict.is_duplicate {
                tracing::info!(
                    employee = %employee,
                    score = verdict.score,
                    "Trip flagged as possible duplicate"
                );
                return Err(Error::DuplicateCandidate(verdict));
            }
        }
        self.create(employee, trip)
    }

    pub fn sync_metadata(&self, employee: &EmployeeId) -> Result<SyncMetadata> {
        self.with_connection(|conn| SqliteSyncMetadataRepository::new(conn).load(employee))
    }

    /// Record which kinds reached the backend after a push pass.
    pub fn record_push(&self, employee: &EmployeeId, outcome: &SyncOutcome) -> Result<()> {
        self.with_connection(|conn| {
            let repo = SqliteSyncMetadataRepository::new(conn);
            let mut metadata = repo.load(employee)?;

            for kind in &outcome.succeeded {
                metadata.unsynced_kinds.remove(kind);
                if outcome.batch_sizes.get(kind).copied().unwrap_or_default() > 0 {
                    metadata.remote_kinds.insert(*kind);
                } else {
                    metadata.remote_kinds.remove(kind);
                }
            }
            metadata.unsynced_kinds.extend(outcome.failed.keys().copied());
            if !outcome.succeeded.is_empty() {
                metadata.last_push_at = Some(unix_millis_now());
            }

            repo.save(employee, &metadata)
        })
    }

    /// Record an applied pull.
    ///
    /// `counts` is the backend's per-kind total; `kept_local` are the kinds the
    /// pull did not overwrite, which still need a push.
    pub fn record_pull(
        &self,
        employee: &EmployeeId,
        counts: &BTreeMap<EntityKind, usize>,
        kept_local: &BTreeSet<EntityKind>,
    ) -> Result<()> {
        self.with_connection(|conn| {
            let repo = SqliteSyncMetadataRepository::new(conn);
            let mut metadata = repo.load(employee)?;

            metadata.last_pull_at = Some(unix_millis_now());
            metadata.unsynced_kinds = kept_local.clone();
            metadata.remote_kinds = counts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(kind, _)| *kind)
                .collect();

            repo.save(employee, &metadata)
        })
    }
}
