//! fieldsync-api - reference backend for the fieldsync sync protocol
//!
//! Holds one canonical record set per employee in memory, accepts whole-kind
//! batch replacement pushes, serves snapshots, and fans out `data_update`
//! events over WebSocket.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod realtime;
pub mod routes;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use error::AppError;
pub use routes::{app_router, AppState};
