//! Duplicate trip detection
//!
//! Scores a candidate trip against the employee's trips in the same calendar
//! month. The verdict is advisory: callers may still insert a flagged trip.

use std::collections::BTreeSet;

use crate::models::{EmployeeId, LocalRecord, RecordId, Trip, YearMonth};

const SAME_DATE_WEIGHT: f64 = 0.30;
const ADJACENT_DATE_WEIGHT: f64 = 0.15;
const LOCATION_WEIGHT: f64 = 0.175;
const DISTANCE_WEIGHT: f64 = 0.35;

/// Tuning for [`DuplicateGuard`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateGuardConfig {
    /// Absolute distance difference still counted as a match
    pub distance_tolerance_miles: f64,
    /// Score at or above which a trip is flagged
    pub threshold: f64,
}

impl Default for DuplicateGuardConfig {
    fn default() -> Self {
        Self {
            distance_tolerance_miles: 0.5,
            threshold: 0.8,
        }
    }
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    /// Best-scoring existing trip, when one was flagged
    pub matching_record_id: Option<RecordId>,
    /// Human-readable explanation
    pub reason: String,
    /// Score of the best candidate in `[0, 1]`
    pub score: f64,
}

impl DuplicateVerdict {
    /// Verdict for a trip with no plausible match.
    pub fn clear() -> Self {
        Self {
            is_duplicate: false,
            matching_record_id: None,
            reason: "No similar trip recorded this month".to_string(),
            score: 0.0,
        }
    }
}

/// Pure duplicate scorer for trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateGuard {
    config: DuplicateGuardConfig,
}

impl DuplicateGuard {
    pub const fn new(config: DuplicateGuardConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> DuplicateGuardConfig {
        self.config
    }

    /// Check `candidate` against `existing`.
    ///
    /// Only trips owned by `employee` in the candidate's month are considered.
    pub fn check(
        &self,
        employee: &EmployeeId,
        candidate: &Trip,
        existing: &[LocalRecord<Trip>],
    ) -> DuplicateVerdict {
        let month = YearMonth::of(candidate.date);
        let candidate_start = location_tokens(&candidate.start_location);
        let candidate_end = location_tokens(&candidate.end_location);

        let best = existing
            .iter()
            .filter(|record| &record.employee_id == employee && month.contains(record.payload.date))
            .map(|record| {
                let score = self.score(candidate, &candidate_start, &candidate_end, &record.payload);
                (score, record)
            })
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        let Some((score, record)) = best else {
            return DuplicateVerdict::clear();
        };

        if score + f64::EPSILON < self.config.threshold {
            return DuplicateVerdict {
                score,
                ..DuplicateVerdict::clear()
            };
        }

        let trip = &record.payload;
        DuplicateVerdict {
            is_duplicate: true,
            matching_record_id: Some(record.id),
            reason: format!(
                "Looks like the trip on {} from {} to {} ({:.1} mi)",
                trip.date, trip.start_location, trip.end_location, trip.distance_miles
            ),
            score,
        }
    }

    fn score(
        &self,
        candidate: &Trip,
        candidate_start: &BTreeSet<String>,
        candidate_end: &BTreeSet<String>,
        other: &Trip,
    ) -> f64 {
        let mut score = match (candidate.date - other.date).num_days().abs() {
            0 => SAME_DATE_WEIGHT,
            1 => ADJACENT_DATE_WEIGHT,
            _ => 0.0,
        };

        score += LOCATION_WEIGHT * jaccard(candidate_start, &location_tokens(&other.start_location));
        score += LOCATION_WEIGHT * jaccard(candidate_end, &location_tokens(&other.end_location));

        if (candidate.distance_miles - other.distance_miles).abs()
            <= self.config.distance_tolerance_miles
        {
            score += DISTANCE_WEIGHT;
        }

        score
    }
}

/// Lowercase alphanumeric tokens with common street abbreviations folded.
fn location_tokens(value: &str) -> BTreeSet<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| {
            let token = token.to_lowercase();
            match token.as_str() {
                "street" => "st".to_string(),
                "avenue" => "ave".to_string(),
                "road" => "rd".to_string(),
                "drive" => "dr".to_string(),
                "boulevard" => "blvd".to_string(),
                "highway" => "hwy".to_string(),
                "lane" => "ln".to_string(),
                "north" => "n".to_string(),
                "south" => "s".to_string(),
                "east" => "e".to_string(),
                "west" => "w".to_string(),
                _ => token,
            }
        })
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
