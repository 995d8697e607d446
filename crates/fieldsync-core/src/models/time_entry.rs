//! Time-tracking entry model

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{EntityKind, EntityPayload};
use crate::error::{Error, Result};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A tracked block of time against a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub date: NaiveDate,
    /// Work category (travel, on-site, admin, ...)
    pub category: String,
    #[serde(default)]
    pub started_at: Option<NaiveTime>,
    #[serde(default)]
    pub ended_at: Option<NaiveTime>,
    /// Tracked duration in minutes
    pub minutes: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TimeEntry {
    /// Build an entry from a start/end time pair, deriving the duration.
    pub fn from_span(
        date: NaiveDate,
        category: impl Into<String>,
        started_at: NaiveTime,
        ended_at: NaiveTime,
    ) -> Result<Self> {
        let minutes = u32::try_from((ended_at - started_at).num_minutes()).map_err(|_| {
            Error::InvalidInput("Time entry must end after it starts".to_string())
        })?;
        Ok(Self {
            date,
            category: category.into(),
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            minutes,
            notes: None,
        })
    }
}

impl EntityPayload for TimeEntry {
    const KIND: EntityKind = EntityKind::TimeEntry;

    fn record_date(&self) -> NaiveDate {
        self.date
    }

    fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Time entry category cannot be empty".to_string(),
            ));
        }
        if self.minutes == 0 || self.minutes > MINUTES_PER_DAY {
            return Err(Error::InvalidInput(format!(
                "Time entry minutes must be in 1..={MINUTES_PER_DAY}, got {}",
                self.minutes
            )));
        }
        if let (Some(start), Some(end)) = (self.started_at, self.ended_at) {
            if end < start {
                return Err(Error::InvalidInput(
                    "Time entry must end after it starts".to_string(),
                ));
            }
        }
        Ok(())
    }
}
