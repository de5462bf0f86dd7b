//! Tenant-scoped failure detector for a distributed database node.
//!
//! Continuously probes the local node for a small set of fatal or serious
//! faults (commit-log disk stalls, data-disk I/O hangs, commit-log disk
//! exhaustion, schema-refresh stalls, and optionally election silence) and
//! maintains an audited, deduplicated registry of active failure events.
//! Other subsystems query the registry or its lock-free latches to decide
//! whether to shed leadership, block transfers, or refuse migrations.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod audit;
pub mod clock;
pub mod detector;
pub mod disk_hang;
pub mod error;
pub mod event;
pub mod probes;
pub mod registry;
pub mod services;

pub use audit::{
    AuditError, AuditRow, AuditSink, InMemoryAuditLog, AUDIT_EVENT_KIND, TAG_DETECT_RECOVER,
    TAG_REMOVE_FAILURE,
};
pub use clock::{Clock, ManualClock, MonotonicClock, PeriodicTask, INVALID_TIMESTAMP};
pub use detector::{FailureDetector, FailureDetectorConfig, DETECTION_INTERVAL, RECOVERY_INTERVAL};
pub use disk_hang::{
    size_to_slot, slot_to_size, BaselineHit, LogDiskHangDetector, LEARN_SLOTS,
    LOG_DISK_DETECT_INTERVAL_US, LOG_DISK_FAILURE_TIME_UPPER_BOUND_US, MIN_RECOVERY_INTERVAL,
    MIN_WRITE_SIZE,
};
pub use error::DetectorError;
pub use event::{FailureEvent, FailureLevel, FailureModule, FailureType, MAX_EVENT_INFO_LEN};
#[cfg(feature = "arbitration")]
pub use probes::ElectionSilenceProbe;
pub use probes::{ClogFullProbe, ClogHangProbe, DataDiskProbe, ProbeReading, SchemaProbe};
pub use registry::{EventRegistry, FamilyLatches, FaultFamily, RecoveryPredicate};
#[cfg(feature = "arbitration")]
pub use services::ReplicaStatus;
pub use services::{
    DeviceHealthStatus, IoManager, IoStatistics, LogService, SchemaService, ServiceError,
    StaticTenantConfig, TenantConfig,
};
