//! Tenant-scoped failure detector.
//!
//! Owns the event registry and the two periodic workers: the detection loop
//! probes every fault family and edge-triggers registry mutations against
//! the per-family latches; the recovery loop polls stored recovery
//! predicates and clears events whose condition has passed. Construct one
//! detector per tenant; there is no process-wide instance.

use crate::audit::AuditSink;
use crate::clock::{Clock, PeriodicTask};
use crate::error::DetectorError;
use crate::event::{FailureEvent, FailureLevel, FailureModule, FailureType};
#[cfg(feature = "arbitration")]
use crate::probes::ElectionSilenceProbe;
use crate::probes::{ClogFullProbe, ClogHangProbe, DataDiskProbe, SchemaProbe};
use crate::registry::{EventRegistry, FaultFamily, RecoveryPredicate};
use crate::services::{IoManager, LogService, SchemaService, TenantConfig};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Cadence of the detection loop.
pub const DETECTION_INTERVAL: Duration = Duration::from_millis(100);
/// Cadence of the recovery loop.
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct FailureDetectorConfig {
    pub tenant_id: u64,
    pub detection_interval: Duration,
    pub recovery_interval: Duration,
}

impl FailureDetectorConfig {
    pub fn for_tenant(tenant_id: u64) -> Self {
        Self {
            tenant_id,
            detection_interval: DETECTION_INTERVAL,
            recovery_interval: RECOVERY_INTERVAL,
        }
    }
}

#[derive(Default)]
struct Workers {
    detection: Option<PeriodicTask>,
    recovery: Option<PeriodicTask>,
}

/// State shared with the periodic workers.
struct Core {
    config: FailureDetectorConfig,
    registry: EventRegistry,
    clog_hang_probe: ClogHangProbe,
    data_disk_probe: DataDiskProbe,
    clog_full_probe: ClogFullProbe,
    schema_probe: SchemaProbe,
    #[cfg(feature = "arbitration")]
    election_probe: ElectionSilenceProbe,
}

pub struct FailureDetector {
    core: Arc<Core>,
    workers: Mutex<Workers>,
}

impl FailureDetector {
    pub fn new(
        config: FailureDetectorConfig,
        log_service: Arc<dyn LogService>,
        io_manager: Arc<dyn IoManager>,
        schema_service: Arc<dyn SchemaService>,
        tenant_config: Arc<dyn TenantConfig>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let core = Core {
            config,
            registry: EventRegistry::new(audit),
            clog_hang_probe: ClogHangProbe::new(log_service.clone(), tenant_config, clock),
            data_disk_probe: DataDiskProbe::new(io_manager),
            clog_full_probe: ClogFullProbe::new(log_service.clone()),
            schema_probe: SchemaProbe::new(schema_service, config.tenant_id),
            #[cfg(feature = "arbitration")]
            election_probe: ElectionSilenceProbe::new(log_service),
        };
        Self {
            core: Arc::new(core),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn tenant_id(&self) -> u64 {
        self.core.config.tenant_id
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.core.registry
    }

    /// Marks the registry running and installs both periodic workers.
    pub fn start(&self) -> Result<(), DetectorError> {
        let mut workers = self.workers.lock();
        if workers.detection.is_some() || workers.recovery.is_some() {
            warn!(
                "failure detector for tenant {} already started",
                self.core.config.tenant_id
            );
            return Err(DetectorError::InvalidArgument);
        }
        self.core.registry.start();
        let core = Arc::clone(&self.core);
        let detection = PeriodicTask::spawn(
            "failure-detect",
            self.core.config.detection_interval,
            move || core.detect_failure(),
        )
        .map_err(|err| {
            error!("failed to spawn detection worker: {err}");
            DetectorError::Internal
        })?;
        let core = Arc::clone(&self.core);
        let recovery = PeriodicTask::spawn(
            "recovery-detect",
            self.core.config.recovery_interval,
            move || core.registry.sweep_recovered(),
        )
        .map_err(|err| {
            error!("failed to spawn recovery worker: {err}");
            detection.stop();
            DetectorError::Internal
        })?;
        workers.detection = Some(detection);
        workers.recovery = Some(recovery);
        info!(
            "failure detector for tenant {} started",
            self.core.config.tenant_id
        );
        Ok(())
    }

    /// Requests both workers to stop; in-flight ticks keep running.
    pub fn stop(&self) {
        self.core.registry.stop();
        let workers = self.workers.lock();
        if let Some(task) = workers.detection.as_ref() {
            task.stop();
        }
        if let Some(task) = workers.recovery.as_ref() {
            task.stop();
        }
        info!(
            "failure detector for tenant {} stop requested",
            self.core.config.tenant_id
        );
    }

    /// Blocks until both workers have returned from any in-flight tick.
    pub fn wait(&self) {
        let mut workers = self.workers.lock();
        if let Some(mut task) = workers.detection.take() {
            task.wait();
        }
        if let Some(mut task) = workers.recovery.take() {
            task.wait();
        }
    }

    /// Resets all latches. Call only after [`wait`](Self::wait).
    pub fn destroy(&self) {
        self.core.registry.latches().reset();
        info!(
            "failure detector for tenant {} destroyed",
            self.core.config.tenant_id
        );
    }

    /// Records a failure event observed by another subsystem. Without a
    /// recovery predicate only an explicit remove clears it.
    pub fn add_failure_event(&self, event: FailureEvent) -> Result<(), DetectorError> {
        self.core.registry.add(event)
    }

    /// Records a failure event whose recovery predicate is polled by the
    /// recovery loop. The predicate must not call back into the detector.
    pub fn add_failure_event_with_recovery(
        &self,
        event: FailureEvent,
        recovery: RecoveryPredicate,
    ) -> Result<(), DetectorError> {
        self.core.registry.add_with_recovery(event, recovery)
    }

    pub fn remove_failure_event(&self, event: &FailureEvent) -> Result<(), DetectorError> {
        self.core.registry.remove(event)
    }

    /// Snapshot of active events at the given severity level.
    pub fn events_with_level(
        &self,
        level: FailureLevel,
    ) -> Result<Vec<FailureEvent>, DetectorError> {
        self.core.registry.events_with_level(level)
    }

    /// Lock-free: commit-log disk hung or out of space.
    pub fn clog_disk_has_fatal_error(&self) -> bool {
        self.core.registry.query_latch(FaultFamily::ClogDiskHang)
            || self.core.registry.query_latch(FaultFamily::ClogDiskFull)
    }

    /// Lock-free: data disk degraded.
    pub fn data_disk_has_fatal_error(&self) -> bool {
        self.core.registry.query_latch(FaultFamily::DataDiskHang)
    }

    /// Lock-free: tenant schema still not refreshed.
    pub fn schema_not_refreshed(&self) -> bool {
        self.core.registry.query_latch(FaultFamily::SchemaNotRefreshed)
    }
}

impl Drop for FailureDetector {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

impl Core {
    fn detect_failure(&self) {
        self.detect_clog_hang();
        self.detect_data_disk_io();
        self.detect_clog_full();
        self.detect_schema_not_refreshed();
        #[cfg(feature = "arbitration")]
        self.detect_election_silent();
    }

    fn detect_clog_hang(&self) {
        let (is_hang, sensitivity) = self.clog_hang_probe.check();
        let event = FailureEvent::with_info(
            FailureType::ProcessHang,
            FailureModule::Log,
            FailureLevel::Fatal,
            format!("clog disk hang, sen: {sensitivity}"),
        );
        self.apply_transition(FaultFamily::ClogDiskHang, is_hang, event);
    }

    fn detect_data_disk_io(&self) {
        let reading = match self.data_disk_probe.check() {
            Ok(reading) => reading,
            Err(err) => {
                warn!("data disk health status unavailable: {err}");
                return;
            }
        };
        let event = FailureEvent::with_info(
            FailureType::ProcessHang,
            FailureModule::Storage,
            FailureLevel::Fatal,
            reading.info,
        );
        self.apply_transition(FaultFamily::DataDiskHang, reading.faulted, event);
    }

    fn detect_clog_full(&self) {
        let reading = match self.clog_full_probe.check() {
            Ok(reading) => reading,
            Err(err) => {
                warn!("commit-log disk space check unavailable: {err}");
                return;
            }
        };
        let event = FailureEvent::with_info(
            FailureType::ResourceNotEnough,
            FailureModule::Log,
            FailureLevel::Fatal,
            reading.info,
        );
        self.apply_transition(FaultFamily::ClogDiskFull, reading.faulted, event);
    }

    fn detect_schema_not_refreshed(&self) {
        let reading = match self.schema_probe.check() {
            Ok(reading) => reading,
            Err(err) => {
                warn!("schema refresh status unavailable: {err}");
                return;
            }
        };
        let event = FailureEvent::with_info(
            FailureType::SchemaNotRefreshed,
            FailureModule::Schema,
            FailureLevel::Serious,
            reading.info,
        );
        self.apply_transition(FaultFamily::SchemaNotRefreshed, reading.faulted, event);
    }

    #[cfg(feature = "arbitration")]
    fn detect_election_silent(&self) {
        let reading = match self.election_probe.check() {
            Ok(reading) => reading,
            Err(err) => {
                warn!("election silence status unavailable: {err}");
                return;
            }
        };
        let event = FailureEvent::with_info(
            FailureType::EnterElectionSilent,
            FailureModule::Log,
            FailureLevel::Fatal,
            reading.info,
        );
        self.apply_transition(FaultFamily::ElectionSilent, reading.faulted, event);
    }

    /// Edge-triggers one family against its latch. A probe agreeing with the
    /// latch is a no-op; `EntryExists`/`EntryNotExist` mean the registry
    /// already matches the probe, so the latch is reconciled; any other
    /// registry error leaves the latch untouched and the next tick retries.
    fn apply_transition(&self, family: FaultFamily, faulted: bool, event: FailureEvent) {
        let latched = self.registry.query_latch(family);
        if !latched {
            if !faulted {
                return;
            }
            match self.registry.add(event.clone()) {
                Ok(()) => {
                    self.registry.latches().set(family, true);
                    if event.level() == FailureLevel::Fatal {
                        error!("{family:?} fault raised, added failure event {event}");
                    } else {
                        warn!("{family:?} fault raised, added failure event {event}");
                    }
                }
                Err(DetectorError::EntryExists) => {
                    self.registry.latches().set(family, true);
                }
                Err(err) => {
                    error!("failed to add failure event {event}: {err}");
                }
            }
        } else {
            if faulted {
                return;
            }
            match self.registry.remove(&event) {
                Ok(()) => {
                    self.registry.latches().set(family, false);
                    info!("{family:?} fault cleared, removed failure event {event}");
                }
                Err(DetectorError::EntryNotExist) => {
                    self.registry.latches().set(family, false);
                }
                Err(err) => {
                    error!("failed to remove failure event {event}: {err}");
                }
            }
        }
    }
}
