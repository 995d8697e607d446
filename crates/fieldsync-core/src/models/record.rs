//! Local record envelope shared by every entity kind

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::EntityKind;
use crate::error::{Error, Result};

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Owner of a set of records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmployeeId(String);

impl EmployeeId {
    /// Build an employee id, trimming whitespace and rejecting empties.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput(
                "Employee id cannot be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmployeeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EmployeeId> for String {
    fn from(id: EmployeeId) -> Self {
        id.0
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity-specific fields carried inside a [`LocalRecord`].
pub trait EntityPayload:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Which table/batch this payload belongs to.
    const KIND: EntityKind;

    /// Calendar date the record is reported under.
    fn record_date(&self) -> NaiveDate;

    /// Reject payloads the store must never persist.
    fn validate(&self) -> Result<()>;
}

/// The unit of persistence for every entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord<T> {
    /// Stable identifier assigned at creation
    pub id: RecordId,
    /// Owner of the record
    pub employee_id: EmployeeId,
    /// Entity-specific fields
    pub payload: T,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

/// A record with its payload left as untyped JSON, used on the wire.
pub type RawRecord = LocalRecord<serde_json::Value>;

impl<T: EntityPayload> LocalRecord<T> {
    /// Create a new record for `employee_id` with a fresh id.
    #[must_use]
    pub fn new(employee_id: EmployeeId, payload: T) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            employee_id,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    pub const fn kind(&self) -> EntityKind {
        T::KIND
    }

    /// Convert into the untyped wire form.
    pub fn into_raw(self) -> Result<RawRecord> {
        Ok(LocalRecord {
            id: self.id,
            employee_id: self.employee_id,
            payload: serde_json::to_value(self.payload)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Parse and validate an untyped record.
    pub fn from_raw(raw: RawRecord) -> Result<Self> {
        let payload: T = serde_json::from_value(raw.payload)?;
        payload.validate()?;
        Ok(Self {
            id: raw.id,
            employee_id: raw.employee_id,
            payload,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }
}
