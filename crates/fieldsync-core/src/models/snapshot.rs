//! Canonical record set returned by a pull

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    DailyEntry, EmployeeId, EntityKind, EntityPayload, LocalRecord, RawRecord, Receipt,
    TimeEntry, Trip,
};
use crate::error::{Error, Result};

/// The backend's full record set for one employee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub daily_entries: Vec<LocalRecord<DailyEntry>>,
    #[serde(default)]
    pub trips: Vec<LocalRecord<Trip>>,
    #[serde(default)]
    pub receipts: Vec<LocalRecord<Receipt>>,
    #[serde(default)]
    pub time_entries: Vec<LocalRecord<TimeEntry>>,
}

impl Snapshot {
    /// Number of records of each kind.
    pub fn counts(&self) -> BTreeMap<EntityKind, usize> {
        BTreeMap::from([
            (EntityKind::DailyEntry, self.daily_entries.len()),
            (EntityKind::Trip, self.trips.len()),
            (EntityKind::Receipt, self.receipts.len()),
            (EntityKind::TimeEntry, self.time_entries.len()),
        ])
    }

    pub fn len(&self) -> usize {
        self.counts().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject snapshots carrying records of another employee or invalid payloads.
    pub fn validate_for(&self, employee: &EmployeeId) -> Result<()> {
        check_records(employee, &self.daily_entries)?;
        check_records(employee, &self.trips)?;
        check_records(employee, &self.receipts)?;
        check_records(employee, &self.time_entries)
    }

    /// Insert one untyped record into the matching list.
    pub fn push_raw(&mut self, kind: EntityKind, raw: RawRecord) -> Result<()> {
        match kind {
            EntityKind::DailyEntry => self.daily_entries.push(LocalRecord::from_raw(raw)?),
            EntityKind::Trip => self.trips.push(LocalRecord::from_raw(raw)?),
            EntityKind::Receipt => self.receipts.push(LocalRecord::from_raw(raw)?),
            EntityKind::TimeEntry => self.time_entries.push(LocalRecord::from_raw(raw)?),
        }
        Ok(())
    }
}

/// Check that an untyped record parses as `kind` and passes validation.
pub fn validate_raw(kind: EntityKind, raw: &RawRecord) -> Result<()> {
    match kind {
        EntityKind::DailyEntry => LocalRecord::<DailyEntry>::from_raw(raw.clone()).map(drop),
        EntityKind::Trip => LocalRecord::<Trip>::from_raw(raw.clone()).map(drop),
        EntityKind::Receipt => LocalRecord::<Receipt>::from_raw(raw.clone()).map(drop),
        EntityKind::TimeEntry => LocalRecord::<TimeEntry>::from_raw(raw.clone()).map(drop),
    }
}

fn check_records<T: EntityPayload>(
    employee: &EmployeeId,
    records: &[LocalRecord<T>],
) -> Result<()> {
    for record in records {
        if &record.employee_id != employee {
            return Err(Error::InvalidInput(format!(
                "Snapshot for {employee} contains {} record {} owned by {}",
                T::KIND,
                record.id,
                record.employee_id
            )));
        }
        record.payload.validate()?;
    }
    Ok(())
}
