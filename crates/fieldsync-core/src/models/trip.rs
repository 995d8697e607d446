//! Trip / mileage model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{EntityKind, EntityPayload};
use crate::error::{Error, Result};

/// A single mileage trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    /// Day the trip was driven
    pub date: NaiveDate,
    /// Free-text start location
    pub start_location: String,
    /// Free-text end location
    pub end_location: String,
    /// Distance driven in miles
    pub distance_miles: f64,
    /// Business purpose
    #[serde(default)]
    pub purpose: Option<String>,
    /// Whether the distance covers the return leg
    #[serde(default)]
    pub round_trip: bool,
}

impl Trip {
    pub fn new(
        date: NaiveDate,
        start_location: impl Into<String>,
        end_location: impl Into<String>,
        distance_miles: f64,
    ) -> Self {
        Self {
            date,
            start_location: start_location.into(),
            end_location: end_location.into(),
            distance_miles,
            purpose: None,
            round_trip: false,
        }
    }

    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }
}

impl EntityPayload for Trip {
    const KIND: EntityKind = EntityKind::Trip;

    fn record_date(&self) -> NaiveDate {
        self.date
    }

    fn validate(&self) -> Result<()> {
        if self.start_location.trim().is_empty() || self.end_location.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Trip start and end locations are required".to_string(),
            ));
        }
        if !self.distance_miles.is_finite() || self.distance_miles < 0.0 {
            return Err(Error::InvalidInput(format!(
                "Trip distance must be a non-negative number, got {}",
                self.distance_miles
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn validate_requires_locations() {
        assert!(Trip::new(day(), "Office", " ", 3.0).validate().is_err());
        assert!(Trip::new(day(), "Office", "Depot", 3.0).validate().is_ok());
    }

    #[test]
    fn validate_rejects_negative_and_nan_distance() {
        assert!(Trip::new(day(), "A", "B", -1.0).validate().is_err());
        assert!(Trip::new(day(), "A", "B", f64::NAN).validate().is_err());
    }

    #[test]
    fn deserializes_with_optional_fields_missing() {
        let trip: Trip = serde_json::from_str(
            r#"{"date":"2024-03-05","start_location":"A","end_location":"B","distance_miles":4.2}"#,
        )
        .unwrap();
        assert_eq!(trip.purpose, None);
        assert!(!trip.round_trip);
    }
}
