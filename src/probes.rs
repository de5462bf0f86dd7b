//! Probe adapters: one boolean question per fault family.
//!
//! Each adapter is a thin read-only view onto an external subsystem and is
//! pure with respect to the registry. Errors from the underlying subsystem
//! surface as [`ServiceError`]; the detection loop treats them as "unknown
//! this tick" and leaves latches untouched.

use crate::clock::Clock;
use crate::disk_hang::LogDiskHangDetector;
use crate::services::{IoManager, LogService, SchemaService, ServiceError, TenantConfig};
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;

/// Outcome of one probe: whether the fault holds, plus a short diagnostic
/// for the event's info string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReading {
    pub faulted: bool,
    pub info: String,
}

impl ProbeReading {
    fn new(faulted: bool, info: impl Into<String>) -> Self {
        Self {
            faulted,
            info: info.into(),
        }
    }
}

/// Fails when the I/O manager reports the data disk as anything but normal.
pub struct DataDiskProbe {
    io_manager: Arc<dyn IoManager>,
}

impl DataDiskProbe {
    pub fn new(io_manager: Arc<dyn IoManager>) -> Self {
        Self { io_manager }
    }

    pub fn check(&self) -> Result<ProbeReading, ServiceError> {
        let (status, error_start_us) = self.io_manager.device_health_status()?;
        if status.is_normal() {
            Ok(ProbeReading::new(false, "data disk io hang event"))
        } else {
            Ok(ProbeReading::new(
                true,
                format!("data disk io hang event, status: {status:?}, since: {error_start_us}"),
            ))
        }
    }
}

/// Fails when the commit-log service reports insufficient disk space.
pub struct ClogFullProbe {
    log_service: Arc<dyn LogService>,
}

impl ClogFullProbe {
    pub fn new(log_service: Arc<dyn LogService>) -> Self {
        Self { log_service }
    }

    pub fn check(&self) -> Result<ProbeReading, ServiceError> {
        let enough = self.log_service.is_disk_space_enough()?;
        Ok(ProbeReading::new(!enough, "clog disk full event"))
    }
}

/// Fails while the tenant's schema has not been refreshed yet.
pub struct SchemaProbe {
    schema_service: Arc<dyn SchemaService>,
    tenant_id: u64,
}

impl SchemaProbe {
    pub fn new(schema_service: Arc<dyn SchemaService>, tenant_id: u64) -> Self {
        Self {
            schema_service,
            tenant_id,
        }
    }

    pub fn check(&self) -> Result<ProbeReading, ServiceError> {
        let not_refreshed = self.schema_service.is_tenant_not_refreshed(self.tenant_id)?;
        Ok(ProbeReading::new(not_refreshed, "schema not refreshed"))
    }
}

/// Fails when any local log replica reports itself election-silent.
#[cfg(feature = "arbitration")]
pub struct ElectionSilenceProbe {
    log_service: Arc<dyn LogService>,
}

#[cfg(feature = "arbitration")]
impl ElectionSilenceProbe {
    pub fn new(log_service: Arc<dyn LogService>) -> Self {
        Self { log_service }
    }

    pub fn check(&self) -> Result<ProbeReading, ServiceError> {
        let mut silent = false;
        self.log_service.for_each_replica(&mut |replica| {
            silent = silent || replica.election_silent;
        })?;
        Ok(ProbeReading::new(silent, "election silent event"))
    }
}

/// Delegates to the adaptive disk-hang detector. Never errors: a failed
/// statistics read logs and returns the latched prior verdict.
pub struct ClogHangProbe {
    detector: Mutex<LogDiskHangDetector>,
    log_service: Arc<dyn LogService>,
    config: Arc<dyn TenantConfig>,
    clock: Arc<dyn Clock>,
}

impl ClogHangProbe {
    pub fn new(
        log_service: Arc<dyn LogService>,
        config: Arc<dyn TenantConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            detector: Mutex::new(LogDiskHangDetector::new()),
            log_service,
            config,
            clock,
        }
    }

    /// Returns the hang verdict and the sensitivity it was computed with.
    pub fn check(&self) -> (bool, i64) {
        let sensitivity = self.config.log_storage_warning_trigger_percentage();
        let tolerance_us = self.config.log_storage_warning_tolerance_time_us();
        let mut detector = self.detector.lock();
        let is_hang = match self.log_service.io_statistics() {
            Ok(stats) => detector.evaluate(self.clock.now_us(), &stats, tolerance_us, sensitivity),
            Err(err) => {
                warn!("commit-log io statistics unavailable: {err}");
                detector.is_failing()
            }
        };
        (is_hang, sensitivity)
    }
}
