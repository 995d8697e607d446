//! Record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{
    EmployeeId, EntityKind, EntityPayload, LocalRecord, RawRecord, RecordId, Snapshot, YearMonth,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const MIN_DATE_BOUND: &str = "0000-01-01";
const MAX_DATE_BOUND: &str = "9999-12-31";

/// Filters applied to a `list` query. All bounds are optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Restrict to one calendar month
    pub month: Option<YearMonth>,
    /// Inclusive lower date bound
    pub from: Option<NaiveDate>,
    /// Inclusive upper date bound
    pub to: Option<NaiveDate>,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub const fn month(month: YearMonth) -> Self {
        Self {
            month: Some(month),
            from: None,
            to: None,
            limit: None,
        }
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Inclusive lower / exclusive upper `record_date` bounds as ISO strings.
    fn date_bounds(&self) -> (String, String) {
        let mut lower = self.from;
        let mut upper = self.to.and_then(|to| to.succ_opt());

        if let Some(month) = self.month {
            if let Some(first) = month.first_day() {
                lower = Some(lower.map_or(first, |from| from.max(first)));
            }
            if let Some(next) = month.next_first_day() {
                upper = Some(upper.map_or(next, |to| to.min(next)));
            }
        }

        (
            lower.map_or_else(
                || MIN_DATE_BOUND.to_string(),
                |date| date.format(DATE_FORMAT).to_string(),
            ),
            upper.map_or_else(
                || MAX_DATE_BOUND.to_string(),
                |date| date.format(DATE_FORMAT).to_string(),
            ),
        )
    }

    fn sql_limit(&self) -> i64 {
        // SQLite treats a negative LIMIT as unbounded
        self.limit.map_or(-1, |limit| limit as i64)
    }
}

/// `updated_at` of each of one employee's rows of a kind, keyed by id.
///
/// Two markers differ whenever a row was inserted, deleted, or updated in between.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindMarker {
    pub rows: BTreeMap<RecordId, i64>,
}

/// Markers for every kind, taken at one point in time.
pub type ChangeMarkers = BTreeMap<EntityKind, KindMarker>;

/// Trait for per-kind record storage operations
pub trait RecordRepository {
    /// Insert a new record
    fn insert<T: EntityPayload>(&self, record: &LocalRecord<T>) -> Result<()>;

    /// Get a record by ID
    fn get<T: EntityPayload>(&self, id: &RecordId) -> Result<Option<LocalRecord<T>>>;

    /// Overwrite an existing record
    fn save<T: EntityPayload>(&self, record: &LocalRecord<T>) -> Result<()>;

    /// Remove a record
    fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<()>;

    /// List an employee's records, newest date first
    fn list<T: EntityPayload>(
        &self,
        employee: &EmployeeId,
        filter: &RecordFilter,
    ) -> Result<Vec<LocalRecord<T>>>;

    /// List an employee's records of `kind` in wire form
    fn list_raw(&self, kind: EntityKind, employee: &EmployeeId) -> Result<Vec<RawRecord>>;

    /// Count an employee's records of `kind`
    fn count(&self, kind: EntityKind, employee: &EmployeeId) -> Result<usize>;

    /// Current marker of every kind for `employee`
    fn change_markers(&self, employee: &EmployeeId) -> Result<ChangeMarkers>;

    /// Replace the rows of `kinds` for `employee` with the snapshot, atomically.
    /// Other kinds are left as they are.
    fn replace_kinds(
        &self,
        employee: &EmployeeId,
        snapshot: &Snapshot,
        kinds: &BTreeSet<EntityKind>,
    ) -> Result<()>;

    /// Replace every table's rows for `employee` with the snapshot, atomically
    fn replace_all(&self, employee: &EmployeeId, snapshot: &Snapshot) -> Result<()> {
        self.replace_kinds(employee, snapshot, &EntityKind::PUSH_ORDER.into_iter().collect())
    }
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

/// A row as stored, before the payload is parsed.
struct RecordRow {
    id: String,
    employee_id: String,
    payload: String,
    created_at: i64,
    updated_at: i64,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            payload: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_record<T: serde::de::DeserializeOwned>(self) -> Result<LocalRecord<T>> {
        let id = self
            .id
            .parse::<RecordId>()
            .map_err(|_| Error::Database(format!("Invalid record id in store: {}", self.id)))?;
        Ok(LocalRecord {
            id,
            employee_id: EmployeeId::new(self.employee_id)?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert_into<T: EntityPayload>(conn: &Connection, record: &LocalRecord<T>) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (id, employee_id, record_date, payload, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                T::KIND.table()
            ),
            params![
                record.id.as_str(),
                record.employee_id.as_str(),
                record.payload.record_date().format(DATE_FORMAT).to_string(),
                serde_json::to_string(&record.payload)?,
                record.created_at,
                record.updated_at
            ],
        )?;
        Ok(())
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn insert<T: EntityPayload>(&self, record: &LocalRecord<T>) -> Result<()> {
        Self::insert_into(self.conn, record)
    }

    fn get<T: EntityPayload>(&self, id: &RecordId) -> Result<Option<LocalRecord<T>>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT id, employee_id, payload, created_at, updated_at FROM {} WHERE id = ?",
                T::KIND.table()
            ),
            params![id.as_str()],
            RecordRow::from_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save<T: EntityPayload>(&self, record: &LocalRecord<T>) -> Result<()> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE {} SET record_date = ?, payload = ?, updated_at = ?
                 WHERE id = ? AND employee_id = ?",
                T::KIND.table()
            ),
            params![
                record.payload.record_date().format(DATE_FORMAT).to_string(),
                serde_json::to_string(&record.payload)?,
                record.updated_at,
                record.id.as_str(),
                record.employee_id.as_str()
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<()> {
        let rows = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?", kind.table()),
            params![id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn list<T: EntityPayload>(
        &self,
        employee: &EmployeeId,
        filter: &RecordFilter,
    ) -> Result<Vec<LocalRecord<T>>> {
        let (lower, upper) = filter.date_bounds();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, employee_id, payload, created_at, updated_at
             FROM {}
             WHERE employee_id = ? AND record_date >= ? AND record_date < ?
             ORDER BY record_date DESC, updated_at DESC
             LIMIT ?",
            T::KIND.table()
        ))?;

        let rows = stmt
            .query_map(
                params![employee.as_str(), lower, upper, filter.sql_limit()],
                RecordRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RecordRow::into_record::<T>).collect()
    }

    fn list_raw(&self, kind: EntityKind, employee: &EmployeeId) -> Result<Vec<RawRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, employee_id, payload, created_at, updated_at
             FROM {}
             WHERE employee_id = ?
             ORDER BY created_at ASC",
            kind.table()
        ))?;

        let rows = stmt
            .query_map(params![employee.as_str()], RecordRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(RecordRow::into_record::<serde_json::Value>)
            .collect()
    }

    fn count(&self, kind: EntityKind, employee: &EmployeeId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE employee_id = ?", kind.table()),
            params![employee.as_str()],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| Error::Database(format!("Invalid row count {count}")))
    }

    fn change_markers(&self, employee: &EmployeeId) -> Result<ChangeMarkers> {
        let mut markers = ChangeMarkers::new();
        for kind in EntityKind::PUSH_ORDER {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, updated_at FROM {} WHERE employee_id = ?",
                kind.table()
            ))?;
            let rows = stmt
                .query_map(params![employee.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut marker = KindMarker::default();
            for (id, updated_at) in rows {
                let id = id
                    .parse::<RecordId>()
                    .map_err(|_| Error::Database(format!("Invalid record id in store: {id}")))?;
                marker.rows.insert(id, updated_at);
            }
            markers.insert(kind, marker);
        }
        Ok(markers)
    }

    fn replace_kinds(
        &self,
        employee: &EmployeeId,
        snapshot: &Snapshot,
        kinds: &BTreeSet<EntityKind>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        for kind in kinds {
            tx.execute(
                &format!("DELETE FROM {} WHERE employee_id = ?", kind.table()),
                params![employee.as_str()],
            )?;
        }

        if kinds.contains(&EntityKind::DailyEntry) {
            for record in &snapshot.daily_entries {
                Self::insert_into(&tx, record)?;
            }
        }
        if kinds.contains(&EntityKind::Trip) {
            for record in &snapshot.trips {
                Self::insert_into(&tx, record)?;
            }
        }
        if kinds.contains(&EntityKind::Receipt) {
            for record in &snapshot.receipts {
                Self::insert_into(&tx, record)?;
            }
        }
        if kinds.contains(&EntityKind::TimeEntry) {
            for record in &snapshot.time_entries {
                Self::insert_into(&tx, record)?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}
