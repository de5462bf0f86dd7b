//! Append-only audit reporting for registry mutations.
//!
//! Every add or remove on the event registry produces one [`AuditRow`] in
//! the process-wide event history. The sink is best-effort: append failures
//! are logged by the caller and never affect registry state.

use crate::event::{FailureModule, FailureType};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Event-kind literal carried by every row.
pub const AUDIT_EVENT_KIND: &str = "FAILURE_DETECTOR";

/// Tag recorded when a recovery predicate clears an event.
pub const TAG_DETECT_RECOVER: &str = "DETECT REVOCER";

/// Tag recorded when an event is removed outside the recovery loop.
pub const TAG_REMOVE_FAILURE: &str = "REMOVE FAILURE";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit history is full")]
    HistoryFull,
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// One row of the server event history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub event_kind: &'static str,
    pub tag: String,
    pub module: FailureModule,
    pub failure_type: FailureType,
    pub auto_recover: bool,
}

impl AuditRow {
    pub fn new(
        tag: impl Into<String>,
        module: FailureModule,
        failure_type: FailureType,
        auto_recover: bool,
    ) -> Self {
        Self {
            event_kind: AUDIT_EVENT_KIND,
            tag: tag.into(),
            module,
            failure_type,
            auto_recover,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, row: AuditRow) -> Result<(), AuditError>;
}

/// In-process stand-in for the server event history table. Keeps the most
/// recent `capacity` rows and rejects appends beyond that.
pub struct InMemoryAuditLog {
    capacity: usize,
    rows: Mutex<Vec<AuditRow>>,
}

impl InMemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn rows(&self) -> Vec<AuditRow> {
        self.rows.lock().clone()
    }

    pub fn rows_with_tag(&self, tag: &str) -> Vec<AuditRow> {
        self.rows
            .lock()
            .iter()
            .filter(|row| row.tag == tag)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, row: AuditRow) -> Result<(), AuditError> {
        let mut rows = self.rows.lock();
        if rows.len() >= self.capacity {
            return Err(AuditError::HistoryFull);
        }
        rows.push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_rows_in_order() {
        let log = InMemoryAuditLog::default();
        log.record(AuditRow::new(
            "clog disk full event",
            FailureModule::Log,
            FailureType::ResourceNotEnough,
            false,
        ))
        .unwrap();
        log.record(AuditRow::new(
            TAG_REMOVE_FAILURE,
            FailureModule::Log,
            FailureType::ResourceNotEnough,
            false,
        ))
        .unwrap();
        let rows = log.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tag, "clog disk full event");
        assert_eq!(rows[1].tag, TAG_REMOVE_FAILURE);
        assert!(rows.iter().all(|row| row.event_kind == AUDIT_EVENT_KIND));
    }

    #[test]
    fn rejects_appends_beyond_capacity() {
        let log = InMemoryAuditLog::new(1);
        let row = AuditRow::new(
            "schema not refreshed",
            FailureModule::Schema,
            FailureType::SchemaNotRefreshed,
            true,
        );
        log.record(row.clone()).unwrap();
        assert!(matches!(log.record(row), Err(AuditError::HistoryFull)));
        assert_eq!(log.len(), 1);
    }
}
