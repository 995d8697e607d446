//! Daily time/description entry model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{EntityKind, EntityPayload};
use crate::error::{Error, Result};

/// What an employee worked on for a day, with hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    pub date: NaiveDate,
    pub description: String,
    pub hours: f64,
}

impl EntityPayload for DailyEntry {
    const KIND: EntityKind = EntityKind::DailyEntry;

    fn record_date(&self) -> NaiveDate {
        self.date
    }

    fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Daily entry description cannot be empty".to_string(),
            ));
        }
        if !(0.0..=24.0).contains(&self.hours) {
            return Err(Error::InvalidInput(format!(
                "Daily hours must be between 0 and 24, got {}",
                self.hours
            )));
        }
        Ok(())
    }
}
