//! fieldsync-core - Core library for fieldsync
//!
//! Offline-first synchronization engine for field-staff trip, receipt, and time
//! records. The local store is the only source the UI reads; the sync coordinator
//! moves data between it and the backend, and the real-time channel triggers
//! local-only refreshes.

pub mod config;
pub mod db;
pub mod duplicate;
pub mod error;
pub mod models;
pub mod realtime;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncEngineConfig;
pub use duplicate::{DuplicateGuard, DuplicateVerdict};
pub use error::{Error, Result};
pub use models::{EmployeeId, EntityKind, LocalRecord, RecordId};
pub use realtime::{EventName, RealtimeEvent, RealtimeHub, RealtimeSubscription};
pub use services::{LocalRefresher, LocalStore, LocalSummary};
pub use state::SyncState;
pub use sync::{
    HttpSyncBackend, PushPacing, SyncBackend, SyncCoordinator, SyncOutcome, SyncReport, SyncRun,
    SyncTrigger,
};
