//! Sync bookkeeping repository implementation

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{EmployeeId, EntityKind};

const KEY_LAST_PUSH_AT: &str = "last_push_at";
const KEY_LAST_PULL_AT: &str = "last_pull_at";
const KEY_UNSYNCED_KINDS: &str = "unsynced_kinds";
const KEY_REMOTE_KINDS: &str = "remote_kinds";

/// Per-employee record of what the backend is known to hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Last push with at least one accepted batch (Unix ms)
    pub last_push_at: Option<i64>,
    /// Last applied pull (Unix ms)
    pub last_pull_at: Option<i64>,
    /// Kinds whose most recent push failed
    pub unsynced_kinds: BTreeSet<EntityKind>,
    /// Kinds the backend is known to hold records for
    pub remote_kinds: BTreeSet<EntityKind>,
}

impl SyncMetadata {
    /// Whether local records exist that the backend may not have received.
    pub fn needs_reconcile(&self) -> bool {
        !self.unsynced_kinds.is_empty()
    }
}

/// Trait for sync bookkeeping storage operations
pub trait SyncMetadataRepository {
    /// Load bookkeeping for an employee
    fn load(&self, employee: &EmployeeId) -> Result<SyncMetadata>;

    /// Persist bookkeeping for an employee
    fn save(&self, employee: &EmployeeId, metadata: &SyncMetadata) -> Result<()>;
}

/// `SQLite` implementation of `SyncMetadataRepository`
pub struct SqliteSyncMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, employee: &EmployeeId, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE employee_id = ? AND key = ?",
                params![employee.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, employee: &EmployeeId, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (employee_id, key, value, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(employee_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![
                employee.as_str(),
                key,
                value,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn load_timestamp(&self, employee: &EmployeeId, key: &str) -> Result<Option<i64>> {
        Ok(self
            .get_value(employee, key)?
            .and_then(|value| value.parse().ok()))
    }

    fn load_kinds(&self, employee: &EmployeeId, key: &str) -> Result<BTreeSet<EntityKind>> {
        let Some(value) = self.get_value(employee, key)? else {
            return Ok(BTreeSet::new());
        };
        match serde_json::from_str(&value) {
            Ok(kinds) => Ok(kinds),
            Err(error) => {
                tracing::warn!(key, %error, "Discarding unreadable sync metadata");
                Ok(BTreeSet::new())
            }
        }
    }
}

impl SyncMetadataRepository for SqliteSyncMetadataRepository<'_> {
    fn load(&self, employee: &EmployeeId) -> Result<SyncMetadata> {
        Ok(SyncMetadata {
            last_push_at: self.load_timestamp(employee, KEY_LAST_PUSH_AT)?,
            last_pull_at: self.load_timestamp(employee, KEY_LAST_PULL_AT)?,
            unsynced_kinds: self.load_kinds(employee, KEY_UNSYNCED_KINDS)?,
            remote_kinds: self.load_kinds(employee, KEY_REMOTE_KINDS)?,
        })
    }

    fn save(&self, employee: &EmployeeId, metadata: &SyncMetadata) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let repo = SqliteSyncMetadataRepository::new(&tx);

        if let Some(at) = metadata.last_push_at {
            repo.set_value(employee, KEY_LAST_PUSH_AT, &at.to_string())?;
        }
        if let Some(at) = metadata.last_pull_at {
            repo.set_value(employee, KEY_LAST_PULL_AT, &at.to_string())?;
        }
        repo.set_value(
            employee,
            KEY_UNSYNCED_KINDS,
            &serde_json::to_string(&metadata.unsynced_kinds)?,
        )?;
        repo.set_value(
            employee,
            KEY_REMOTE_KINDS,
            &serde_json::to_string(&metadata.remote_kinds)?,
        )?;

        tx.commit()?;
        Ok(())
    }
}
