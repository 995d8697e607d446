//! Data models for fieldsync

mod daily_entry;
mod kind;
mod month;
mod receipt;
mod record;
mod snapshot;
mod time_entry;
mod trip;

pub use daily_entry::DailyEntry;
pub use kind::EntityKind;
pub use month::YearMonth;
pub use receipt::Receipt;
pub use record::{EmployeeId, EntityPayload, LocalRecord, RawRecord, RecordId};
pub use snapshot::{validate_raw, Snapshot};
pub use time_entry::TimeEntry;
pub use trip::Trip;
