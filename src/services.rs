//! Read-only views onto the external subsystems the detector consumes.
//!
//! The wider database owns these interfaces; the detector only reads them.
//! Every method can fail with [`ServiceError`], which the detection loop
//! treats as "unknown this tick": log and retry, never flip state.

use crate::clock::INVALID_TIMESTAMP;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("subsystem unavailable: {0}")]
    Unavailable(String),
    #[error("subsystem returned malformed data: {0}")]
    Malformed(String),
}

/// Commit-log write statistics sampled from the log service.
///
/// `accum_*` counters are cumulative since process start; `pending_*`
/// describe I/O currently in flight. Latencies are microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStatistics {
    pub last_working_time_us: i64,
    pub pending_write_size: i64,
    pub pending_write_count: i64,
    pub pending_write_rt_us: i64,
    pub accum_write_size: i64,
    pub accum_write_count: i64,
    pub accum_write_rt_us: i64,
}

impl IoStatistics {
    pub fn idle() -> Self {
        Self {
            last_working_time_us: INVALID_TIMESTAMP,
            pending_write_size: 0,
            pending_write_count: 0,
            pending_write_rt_us: 0,
            accum_write_size: 0,
            accum_write_count: 0,
            accum_write_rt_us: 0,
        }
    }
}

/// Device health as reported by the I/O manager. Anything other than
/// `Normal` means the data disk is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceHealthStatus {
    Normal,
    Warning,
    Error,
}

impl DeviceHealthStatus {
    pub fn is_normal(self) -> bool {
        matches!(self, DeviceHealthStatus::Normal)
    }
}

/// Election state of one local log replica.
#[cfg(feature = "arbitration")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub replica_id: u64,
    pub election_silent: bool,
}

/// Commit-log service surface consumed by the detector.
pub trait LogService: Send + Sync {
    fn io_statistics(&self) -> Result<IoStatistics, ServiceError>;

    fn is_disk_space_enough(&self) -> Result<bool, ServiceError>;

    /// Visits every local log replica. The visitor must not block.
    #[cfg(feature = "arbitration")]
    fn for_each_replica(
        &self,
        visit: &mut dyn FnMut(&ReplicaStatus),
    ) -> Result<(), ServiceError>;
}

/// Data-disk health surface consumed by the detector.
pub trait IoManager: Send + Sync {
    /// Returns the device health and, when degraded, the time the error
    /// state began (microseconds, [`INVALID_TIMESTAMP`] when healthy).
    fn device_health_status(&self) -> Result<(DeviceHealthStatus, i64), ServiceError>;
}

/// Schema service surface consumed by the detector.
pub trait SchemaService: Send + Sync {
    fn is_tenant_not_refreshed(&self, tenant_id: u64) -> Result<bool, ServiceError>;
}

/// Tenant-scoped configuration read each detection tick.
pub trait TenantConfig: Send + Sync {
    /// How long a pending commit-log I/O may linger before it is classed as
    /// a long-pending hang. Microseconds.
    fn log_storage_warning_tolerance_time_us(&self) -> i64;

    /// Sensitivity 0-100 of the disk-hang detector; 0 disables it.
    fn log_storage_warning_trigger_percentage(&self) -> i64;
}

/// Fixed-value [`TenantConfig`] for embedding and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticTenantConfig {
    pub tolerance_time_us: i64,
    pub trigger_percentage: i64,
}

impl StaticTenantConfig {
    pub fn new(tolerance_time_us: i64, trigger_percentage: i64) -> Self {
        Self {
            tolerance_time_us,
            trigger_percentage,
        }
    }
}

impl Default for StaticTenantConfig {
    fn default() -> Self {
        // Detector disabled until an operator opts in.
        Self::new(5_000_000, 0)
    }
}

impl TenantConfig for StaticTenantConfig {
    fn log_storage_warning_tolerance_time_us(&self) -> i64 {
        self.tolerance_time_us
    }

    fn log_storage_warning_trigger_percentage(&self) -> i64 {
        self.trigger_percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_statistics_have_no_working_time() {
        let stats = IoStatistics::idle();
        assert_eq!(stats.last_working_time_us, INVALID_TIMESTAMP);
        assert_eq!(stats.accum_write_count, 0);
    }

    #[test]
    fn only_normal_devices_are_healthy() {
        assert!(DeviceHealthStatus::Normal.is_normal());
        assert!(!DeviceHealthStatus::Warning.is_normal());
        assert!(!DeviceHealthStatus::Error.is_normal());
    }
}
