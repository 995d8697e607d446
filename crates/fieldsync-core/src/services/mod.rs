//! Shared services used by client apps.

mod local_store;
mod refresh;

pub use local_store::LocalStore;
pub use refresh::{LocalRefresher, LocalSummary};
