//! Entity kind model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The four locally-owned record kinds.
///
/// Declaration order is the push order: receipts carry image references and are
/// the heaviest batch, so they go after the lighter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Daily time/description entry
    DailyEntry,
    /// Trip / mileage entry
    Trip,
    /// Expense receipt
    Receipt,
    /// Time-tracking entry
    TimeEntry,
}

impl EntityKind {
    /// Fixed order used by every push pass.
    pub const PUSH_ORDER: [Self; 4] = [Self::DailyEntry, Self::Trip, Self::Receipt, Self::TimeEntry];

    /// Local table name, also used as the wire label.
    pub const fn table(self) -> &'static str {
        match self {
            Self::DailyEntry => "daily_entries",
            Self::Trip => "trips",
            Self::Receipt => "receipts",
            Self::TimeEntry => "time_entries",
        }
    }

    /// Whether batches of this kind carry attachment references.
    pub const fn carries_attachments(self) -> bool {
        matches!(self, Self::Receipt)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "daily_entries" | "daily_entry" => Ok(Self::DailyEntry),
            "trips" | "trip" => Ok(Self::Trip),
            "receipts" | "receipt" => Ok(Self::Receipt),
            "time_entries" | "time_entry" => Ok(Self::TimeEntry),
            other => Err(Error::InvalidInput(format!("Unknown record kind: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_order_puts_receipts_after_trips() {
        let order = EntityKind::PUSH_ORDER;
        assert_eq!(order[0], EntityKind::DailyEntry);
        assert_eq!(order[1], EntityKind::Trip);
        assert_eq!(order[2], EntityKind::Receipt);
        assert_eq!(order[3], EntityKind::TimeEntry);
    }

    #[test]
    fn ordering_matches_push_order() {
        let mut kinds = vec![EntityKind::TimeEntry, EntityKind::Receipt, EntityKind::DailyEntry];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![EntityKind::DailyEntry, EntityKind::Receipt, EntityKind::TimeEntry]
        );
    }

    #[test]
    fn parses_table_and_singular_labels() {
        assert_eq!("trips".parse::<EntityKind>().unwrap(), EntityKind::Trip);
        assert_eq!("time_entry".parse::<EntityKind>().unwrap(), EntityKind::TimeEntry);
        assert!("invoices".parse::<EntityKind>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&EntityKind::DailyEntry).unwrap();
        assert_eq!(json, "\"daily_entry\"");
    }
}
