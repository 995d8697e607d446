//! Database layer for fieldsync

mod connection;
mod migrations;
mod repository;
mod sync_metadata;

pub use connection::Database;
pub use repository::{
    ChangeMarkers, KindMarker, RecordFilter, RecordRepository, SqliteRecordRepository,
};
pub use sync_metadata::{SqliteSyncMetadataRepository, SyncMetadata, SyncMetadataRepository};
