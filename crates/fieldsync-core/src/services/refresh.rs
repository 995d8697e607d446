//! Local-only view recomputation driven by real-time events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::LocalStore;
use crate::db::RecordFilter;
use crate::models::{
    DailyEntry, EmployeeId, EntityKind, Receipt, TimeEntry, Trip, YearMonth,
};
use crate::realtime::{EventName, RealtimeEvent, RealtimeSubscription};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Totals the UI shows for one employee and month.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSummary {
    pub employee_id: EmployeeId,
    pub month: YearMonth,
    /// All-time record counts per kind
    pub counts: BTreeMap<EntityKind, usize>,
    pub month_miles: f64,
    pub month_expense_cents: i64,
    /// Hours from daily entries
    pub month_hours: f64,
    pub month_tracked_minutes: u64,
    /// Recomputation time (Unix ms)
    pub refreshed_at: i64,
}

/// Recomputes [`LocalSummary`] from the local store and publishes it.
///
/// Never touches the network.
#[derive(Clone)]
pub struct LocalRefresher {
    store: LocalStore,
    employee: EmployeeId,
    month: Option<YearMonth>,
    summary: Arc<watch::Sender<Option<LocalSummary>>>,
    refreshes: Arc<AtomicUsize>,
    // Keeps concurrent refreshes from publishing out of order
    refresh_lock: Arc<Mutex<()>>,
}

impl LocalRefresher {
    pub fn new(store: LocalStore, employee: EmployeeId) -> Self {
        let (summary, _) = watch::channel(None);
        Self {
            store,
            employee,
            month: None,
            summary: Arc::new(summary),
            refreshes: Arc::new(AtomicUsize::new(0)),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Summarize `month` instead of the current calendar month.
    #[must_use]
    pub const fn with_month(mut self, month: YearMonth) -> Self {
        self.month = Some(month);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LocalSummary>> {
        self.summary.subscribe()
    }

    pub fn current(&self) -> Option<LocalSummary> {
        self.summary.borrow().clone()
    }

    /// Number of completed refreshes.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Acquire)
    }

    /// Re-read the local store and publish a new summary.
    pub fn refresh(&self) -> Result<LocalSummary> {
        let _serial = self
            .refresh_lock
            .lock()
            .map_err(|_| Error::Database("Refresh lock poisoned".to_string()))?;
        let month = self
            .month
            .unwrap_or_else(|| YearMonth::of(chrono::Utc::now().date_naive()));
        let filter = RecordFilter::month(month);
        let employee = &self.employee;

        let month_miles = self
            .store
            .list::<Trip>(employee, &filter)?
            .iter()
            .map(|trip| trip.payload.distance_miles)
            .sum();
        let month_expense_cents = self
            .store
            .list::<Receipt>(employee, &filter)?
            .iter()
            .map(|receipt| receipt.payload.amount_cents)
            .sum();
        let month_hours = self
            .store
            .list::<DailyEntry>(employee, &filter)?
            .iter()
            .map(|entry| entry.payload.hours)
            .sum();
        let month_tracked_minutes = self
            .store
            .list::<TimeEntry>(employee, &filter)?
            .iter()
            .map(|entry| u64::from(entry.payload.minutes))
            .sum();

        let summary = LocalSummary {
            employee_id: employee.clone(),
            month,
            counts: self.store.counts(employee)?,
            month_miles,
            month_expense_cents,
            month_hours,
            month_tracked_minutes,
            refreshed_at: unix_millis_now(),
        };

        self.refreshes.fetch_add(1, Ordering::AcqRel);
        self.summary.send_replace(Some(summary.clone()));
        tracing::debug!(employee = %employee, month = %month, "Local view refreshed");
        Ok(summary)
    }

    /// Refresh on every `data_update` delivered to `subscription`.
    ///
    /// Inside a Tokio runtime the store reads run on the blocking pool, so the
    /// socket task that dispatches events never waits on `SQLite`.
    pub fn attach(&self, subscription: &RealtimeSubscription) {
        let refresher = self.clone();
        subscription.on(EventName::DataUpdate, move |event: &RealtimeEvent| {
            let refresher = refresher.clone();
            let name = event.name();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || refresher.refresh_for(name));
                }
                Err(_) => refresher.refresh_for(name),
            }
        });
    }

    fn refresh_for(&self, event: EventName) {
        if let Err(error) = self.refresh() {
            tracing::warn!(%event, %error, "Local refresh failed");
        }
    }
}
