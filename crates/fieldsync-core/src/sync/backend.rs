//! Backend seam used by the push and pull passes

use serde::{Deserialize, Serialize};

use crate::models::{EmployeeId, EntityKind, RawRecord, Snapshot};
use crate::Result;

/// Backend acknowledgement of one pushed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAck {
    /// Records the backend now holds for the pushed kind
    pub accepted: usize,
}

/// Request/response system of record.
///
/// A pushed batch is the employee's complete set for that kind; the backend
/// replaces whatever it held before.
#[allow(async_fn_in_trait)]
pub trait SyncBackend {
    /// Send every local record of `kind` for `employee`.
    async fn push_batch(
        &self,
        employee: &EmployeeId,
        kind: EntityKind,
        records: &[RawRecord],
    ) -> Result<BatchAck>;

    /// Fetch the canonical record set for `employee`.
    async fn fetch_snapshot(&self, employee: &EmployeeId) -> Result<Snapshot>;
}
