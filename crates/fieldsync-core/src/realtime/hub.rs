//! Process-wide registry of real-time subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::channel::{RealtimeOptions, RealtimeSubscription};
use crate::models::EmployeeId;
use crate::{Error, Result};

/// Hands out at most one active subscription per employee.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    options: RealtimeOptions,
    subscriptions: Arc<Mutex<HashMap<EmployeeId, RealtimeSubscription>>>,
}

impl RealtimeHub {
    pub fn new(options: RealtimeOptions) -> Self {
        Self {
            options,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<EmployeeId, RealtimeSubscription>>> {
        self.subscriptions
            .lock()
            .map_err(|_| Error::Realtime("Subscription registry poisoned".to_string()))
    }

    /// Connect `employee`, or return the subscription already open for them.
    pub fn connect(&self, employee: &EmployeeId) -> Result<RealtimeSubscription> {
        let mut registry = self.registry()?;
        if let Some(existing) = registry.get(employee) {
            if !existing.is_closed() {
                tracing::debug!(employee = %employee, "Reusing realtime subscription");
                return Ok(existing.clone());
            }
        }

        tracing::info!(employee = %employee, "Opening realtime subscription");
        let subscription = RealtimeSubscription::connect(&self.options, employee.clone());
        registry.insert(employee.clone(), subscription.clone());
        Ok(subscription)
    }

    pub fn get(&self, employee: &EmployeeId) -> Result<Option<RealtimeSubscription>> {
        Ok(self
            .registry()?
            .get(employee)
            .filter(|subscription| !subscription.is_closed())
            .cloned())
    }

    /// Close and forget the employee's subscription. Returns whether one existed.
    pub fn disconnect(&self, employee: &EmployeeId) -> Result<bool> {
        let removed = self.registry()?.remove(employee);
        Ok(removed.is_some_and(|subscription| {
            subscription.close();
            true
        }))
    }

    pub fn active_count(&self) -> Result<usize> {
        Ok(self
            .registry()?
            .values()
            .filter(|subscription| !subscription.is_closed())
            .count())
    }
}
