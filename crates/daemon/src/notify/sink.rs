//! Alert sinks: where alerts end up.

use std::sync::{Mutex, PoisonError};

use super::alert::{Alert, AlertId, Persistence};

/// Renders alerts. Implementations must not block.
pub trait AlertSink: Send + Sync {
    /// Posts `alert`, replacing any alert with the same id.
    fn post(&self, alert: Alert);

    /// Cancels the alert with `id`, if shown.
    fn cancel(&self, id: AlertId);
}

/// Headless sink that writes alerts to the log.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn post(&self, alert: Alert) {
        match alert.id {
            AlertId::Error => tracing::error!(
                alert = %alert.id,
                "{}: {}",
                alert.title,
                alert.text
            ),
            _ => tracing::info!(
                alert = %alert.id,
                ongoing = alert.persistence == Persistence::Ongoing,
                "{}: {}",
                alert.title,
                alert.text
            ),
        }
    }

    fn cancel(&self, id: AlertId) {
        tracing::debug!(alert = %id, "Alert cancelled");
    }
}

/// One entry of a [`MemoryAlertSink`] log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertRecord {
    Posted(Alert),
    Cancelled(AlertId),
}

/// Sink that records every call, for embedding hosts that render alerts
/// themselves and for tests.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    log: Mutex<Vec<AlertRecord>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call log.
    pub fn records(&self) -> Vec<AlertRecord> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Alerts posted so far, in order.
    pub fn posted(&self) -> Vec<Alert> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                AlertRecord::Posted(alert) => Some(alert),
                AlertRecord::Cancelled(_) => None,
            })
            .collect()
    }

    /// Drains the call log.
    pub fn take(&self) -> Vec<AlertRecord> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AlertSink for MemoryAlertSink {
    fn post(&self, alert: Alert) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AlertRecord::Posted(alert));
    }

    fn cancel(&self, id: AlertId) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AlertRecord::Cancelled(id));
    }
}
