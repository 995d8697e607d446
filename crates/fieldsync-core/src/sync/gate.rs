//! Single-flight guard for sync runs

use std::sync::atomic::{AtomicBool, Ordering};

/// Mutual-exclusion flag owned by one coordinator.
#[derive(Debug, Default)]
pub struct SyncGate {
    active: AtomicBool,
}

impl SyncGate {
    /// Claim the gate, or `None` if a run is already active.
    pub fn try_begin(&self) -> Option<SyncSession<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncSession { gate: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Token for the active run; dropping it clears the gate.
#[derive(Debug)]
pub struct SyncSession<'a> {
    gate: &'a SyncGate,
}

impl Drop for SyncSession<'_> {
    fn drop(&mut self) {
        self.gate.active.store(false, Ordering::Release);
    }
}
