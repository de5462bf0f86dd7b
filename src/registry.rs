//! Deduplicated registry of active failure events.
//!
//! The registry owns the active-event list and the per-family latch flags.
//! Every mutating or listing operation serializes on one mutex; latches are
//! plain atomics so consumers can fast-path "does the log disk currently
//! have a fatal error?" without taking the lock. Consumers that need
//! latch/registry consistency must go through the locked operations.

use crate::audit::{AuditRow, AuditSink, TAG_DETECT_RECOVER, TAG_REMOVE_FAILURE};
use crate::error::DetectorError;
use crate::event::{FailureEvent, FailureLevel};
use log::{info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Boolean thunk deciding whether an event's underlying condition has
/// cleared. Predicates run with the registry lock held and must not call
/// back into the registry. A panicking predicate counts as "not recovered".
pub struct RecoveryPredicate(Box<dyn Fn() -> bool + Send>);

impl RecoveryPredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        Self(Box::new(predicate))
    }

    fn evaluate(&self) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.0)())).unwrap_or(false)
    }
}

impl fmt::Debug for RecoveryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecoveryPredicate")
    }
}

#[derive(Debug)]
struct RegistryEntry {
    event: FailureEvent,
    recovery: Option<RecoveryPredicate>,
}

/// Fault families tracked by the detection loop, one latch each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultFamily {
    ClogDiskHang,
    DataDiskHang,
    ClogDiskFull,
    SchemaNotRefreshed,
    #[cfg(feature = "arbitration")]
    ElectionSilent,
}

/// Per-family sticky booleans, always consistent with registry contents.
#[derive(Debug, Default)]
pub struct FamilyLatches {
    clog_disk_hang: AtomicBool,
    data_disk_hang: AtomicBool,
    clog_disk_full: AtomicBool,
    schema_not_refreshed: AtomicBool,
    #[cfg(feature = "arbitration")]
    election_silent: AtomicBool,
}

impl FamilyLatches {
    fn slot(&self, family: FaultFamily) -> &AtomicBool {
        match family {
            FaultFamily::ClogDiskHang => &self.clog_disk_hang,
            FaultFamily::DataDiskHang => &self.data_disk_hang,
            FaultFamily::ClogDiskFull => &self.clog_disk_full,
            FaultFamily::SchemaNotRefreshed => &self.schema_not_refreshed,
            #[cfg(feature = "arbitration")]
            FaultFamily::ElectionSilent => &self.election_silent,
        }
    }

    pub fn get(&self, family: FaultFamily) -> bool {
        self.slot(family).load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, family: FaultFamily, value: bool) {
        self.slot(family).store(value, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.set(FaultFamily::ClogDiskHang, false);
        self.set(FaultFamily::DataDiskHang, false);
        self.set(FaultFamily::ClogDiskFull, false);
        self.set(FaultFamily::SchemaNotRefreshed, false);
        #[cfg(feature = "arbitration")]
        self.set(FaultFamily::ElectionSilent, false);
    }
}

struct RegistryState {
    running: bool,
    entries: Vec<RegistryEntry>,
}

pub struct EventRegistry {
    state: Mutex<RegistryState>,
    latches: FamilyLatches,
    audit: Arc<dyn AuditSink>,
}

impl EventRegistry {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                running: false,
                entries: Vec::new(),
            }),
            latches: FamilyLatches::default(),
            audit,
        }
    }

    pub(crate) fn start(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.running = true;
    }

    pub(crate) fn stop(&self) {
        self.state.lock().running = false;
    }

    pub fn latches(&self) -> &FamilyLatches {
        &self.latches
    }

    /// Lock-free read of one per-family latch.
    pub fn query_latch(&self, family: FaultFamily) -> bool {
        self.latches.get(family)
    }

    /// Records an active failure event with no recovery predicate; only an
    /// explicit remove clears it.
    pub fn add(&self, event: FailureEvent) -> Result<(), DetectorError> {
        self.insert(event, None)
    }

    /// Records an active failure event whose predicate is polled by the
    /// recovery loop.
    pub fn add_with_recovery(
        &self,
        event: FailureEvent,
        recovery: RecoveryPredicate,
    ) -> Result<(), DetectorError> {
        self.insert(event, Some(recovery))
    }

    fn insert(
        &self,
        event: FailureEvent,
        recovery: Option<RecoveryPredicate>,
    ) -> Result<(), DetectorError> {
        let mut state = self.state.lock();
        if !state.running {
            warn!("rejecting add of failure event {event}: registry not running");
            return Err(DetectorError::NotRunning);
        }
        if state.entries.iter().any(|entry| entry.event == event) {
            warn!("failure event {event} already recorded");
            return Err(DetectorError::EntryExists);
        }
        let auto_recover = recovery.is_some();
        info!("recorded failure event {event} auto_recover={auto_recover}");
        self.record_history(&event, auto_recover, event.info().to_string());
        state.entries.push(RegistryEntry { event, recovery });
        Ok(())
    }

    pub fn remove(&self, event: &FailureEvent) -> Result<(), DetectorError> {
        let mut state = self.state.lock();
        if !state.running {
            warn!("rejecting remove of failure event {event}: registry not running");
            return Err(DetectorError::NotRunning);
        }
        let Some(idx) = state.entries.iter().position(|entry| &entry.event == event) else {
            warn!("failure event {event} not recorded");
            return Err(DetectorError::EntryNotExist);
        };
        // Audit before removal so the row reflects the stored predicate.
        let auto_recover = state.entries[idx].recovery.is_some();
        self.record_history(&state.entries[idx].event, auto_recover, TAG_REMOVE_FAILURE);
        let removed = state.entries.remove(idx);
        info!("removed failure event {}", removed.event);
        Ok(())
    }

    /// Snapshot of active events at the given severity level.
    pub fn events_with_level(
        &self,
        level: FailureLevel,
    ) -> Result<Vec<FailureEvent>, DetectorError> {
        let state = self.state.lock();
        if !state.running {
            warn!("rejecting event listing: registry not running");
            return Err(DetectorError::NotRunning);
        }
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.event.level() == level)
            .map(|entry| entry.event.clone())
            .collect())
    }

    /// One recovery pass: evaluates every stored predicate and removes the
    /// events whose predicate reports the condition cleared.
    pub(crate) fn sweep_recovered(&self) {
        let mut state = self.state.lock();
        if !state.entries.is_empty() {
            info!(
                "running recovery sweep over {} active failure events",
                state.entries.len()
            );
        }
        let mut idx = 0;
        while idx < state.entries.len() {
            let recovered = match &state.entries[idx].recovery {
                Some(predicate) => predicate.evaluate(),
                None => false,
            };
            if recovered {
                info!(
                    "recovery detected for failure event {}",
                    state.entries[idx].event
                );
                self.record_history(&state.entries[idx].event, true, TAG_DETECT_RECOVER);
                state.entries.remove(idx);
            } else {
                idx += 1;
            }
        }
    }

    fn record_history(&self, event: &FailureEvent, auto_recover: bool, tag: impl Into<String>) {
        let row = AuditRow::new(tag, event.module(), event.failure_type(), auto_recover);
        if let Err(err) = self.audit.record(row) {
            warn!("failed to append audit row for {event}: {err}");
        }
    }
}
