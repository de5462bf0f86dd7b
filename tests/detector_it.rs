use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vigil::{
    AuditSink, Clock, DetectorError, DeviceHealthStatus, FailureDetector, FailureDetectorConfig,
    FailureEvent, FailureLevel, FailureModule, FailureType, InMemoryAuditLog, IoManager,
    IoStatistics, LogService, ManualClock, RecoveryPredicate, SchemaService, ServiceError,
    StaticTenantConfig, TAG_DETECT_RECOVER, TAG_REMOVE_FAILURE,
};

const TENANT_ID: u64 = 1002;

#[derive(Debug)]
struct MockState {
    disk_space_enough: AtomicBool,
    device_status: Mutex<DeviceHealthStatus>,
    schema_not_refreshed: AtomicBool,
    io_stats: Mutex<IoStatistics>,
}

impl MockState {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            disk_space_enough: AtomicBool::new(true),
            device_status: Mutex::new(DeviceHealthStatus::Normal),
            schema_not_refreshed: AtomicBool::new(false),
            io_stats: Mutex::new(IoStatistics::idle()),
        })
    }
}

struct MockLogService(Arc<MockState>);

impl LogService for MockLogService {
    fn io_statistics(&self) -> Result<IoStatistics, ServiceError> {
        Ok(*self.0.io_stats.lock())
    }

    fn is_disk_space_enough(&self) -> Result<bool, ServiceError> {
        Ok(self.0.disk_space_enough.load(Ordering::SeqCst))
    }

    #[cfg(feature = "arbitration")]
    fn for_each_replica(
        &self,
        _visit: &mut dyn FnMut(&vigil::ReplicaStatus),
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct MockIoManager(Arc<MockState>);

impl IoManager for MockIoManager {
    fn device_health_status(&self) -> Result<(DeviceHealthStatus, i64), ServiceError> {
        Ok((*self.0.device_status.lock(), -1))
    }
}

struct MockSchemaService(Arc<MockState>);

impl SchemaService for MockSchemaService {
    fn is_tenant_not_refreshed(&self, tenant_id: u64) -> Result<bool, ServiceError> {
        assert_eq!(tenant_id, TENANT_ID);
        Ok(self.0.schema_not_refreshed.load(Ordering::SeqCst))
    }
}

struct Rig {
    detector: Arc<FailureDetector>,
    state: Arc<MockState>,
    audit: Arc<InMemoryAuditLog>,
    clock: Arc<ManualClock>,
}

fn rig_with_sensitivity(sensitivity: i64) -> Rig {
    let state = MockState::healthy();
    let audit = Arc::new(InMemoryAuditLog::default());
    let clock = Arc::new(ManualClock::new(10_000_000));
    let mut config = FailureDetectorConfig::for_tenant(TENANT_ID);
    config.detection_interval = Duration::from_millis(10);
    config.recovery_interval = Duration::from_millis(20);
    let detector = Arc::new(FailureDetector::new(
        config,
        Arc::new(MockLogService(state.clone())),
        Arc::new(MockIoManager(state.clone())),
        Arc::new(MockSchemaService(state.clone())),
        Arc::new(StaticTenantConfig::new(5_000_000, sensitivity)),
        audit.clone() as Arc<dyn AuditSink>,
        clock.clone(),
    ));
    detector.start().expect("start failure detector");
    Rig {
        detector,
        state,
        audit,
        clock,
    }
}

fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

fn shut_down(rig: &Rig) {
    rig.detector.stop();
    rig.detector.wait();
    rig.detector.destroy();
}

#[test]
fn data_disk_fault_follows_the_device_status() {
    let rig = rig_with_sensitivity(0);
    assert!(!rig.detector.data_disk_has_fatal_error());

    *rig.state.device_status.lock() = DeviceHealthStatus::Error;
    assert!(wait_until(Duration::from_secs(2), || {
        rig.detector.data_disk_has_fatal_error()
    }));
    let fatal = rig.detector.events_with_level(FailureLevel::Fatal).unwrap();
    assert!(fatal
        .iter()
        .any(|event| event.failure_type() == FailureType::ProcessHang
            && event.module() == FailureModule::Storage));

    *rig.state.device_status.lock() = DeviceHealthStatus::Normal;
    assert!(wait_until(Duration::from_secs(2), || {
        !rig.detector.data_disk_has_fatal_error()
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        !rig
            .audit
            .rows_with_tag(TAG_REMOVE_FAILURE)
            .is_empty()
    }));
    shut_down(&rig);
}

#[test]
fn clog_full_fault_sets_the_fatal_latch_and_audits() {
    let rig = rig_with_sensitivity(0);
    rig.state.disk_space_enough.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        rig.detector.clog_disk_has_fatal_error()
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        !rig.audit.rows_with_tag("clog disk full event").is_empty()
    }));

    rig.state.disk_space_enough.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        !rig.detector.clog_disk_has_fatal_error()
    }));
    shut_down(&rig);
}

#[test]
fn schema_refresh_stall_is_serious_not_fatal() {
    let rig = rig_with_sensitivity(0);
    rig.state.schema_not_refreshed.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        rig.detector.schema_not_refreshed()
    }));
    let serious = rig
        .detector
        .events_with_level(FailureLevel::Serious)
        .unwrap();
    assert_eq!(serious.len(), 1);
    assert_eq!(serious[0].failure_type(), FailureType::SchemaNotRefreshed);
    assert!(rig
        .detector
        .events_with_level(FailureLevel::Fatal)
        .unwrap()
        .is_empty());

    rig.state.schema_not_refreshed.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        !rig.detector.schema_not_refreshed()
    }));
    shut_down(&rig);
}

#[test]
fn clog_disk_stall_raises_and_clears_through_the_loop() {
    let rig = rig_with_sensitivity(0);
    // Stall the log writer 6 s in the past, then let the rate limiter see a
    // fresh second.
    {
        let mut stats = rig.state.io_stats.lock();
        stats.last_working_time_us = rig.clock.now_us() - 6_000_000;
    }
    rig.clock.advance_us(1_000_000);
    assert!(wait_until(Duration::from_secs(2), || {
        rig.detector.clog_disk_has_fatal_error()
    }));
    let fatal = rig.detector.events_with_level(FailureLevel::Fatal).unwrap();
    assert!(fatal
        .iter()
        .any(|event| event.module() == FailureModule::Log
            && event.info().starts_with("clog disk hang, sen: ")));

    // Progress resumes; with sensitivity 0 the detector recovers on the
    // next sampled evaluation.
    {
        let mut stats = rig.state.io_stats.lock();
        stats.last_working_time_us = rig.clock.now_us() + 1_000_000;
    }
    rig.clock.advance_us(1_000_000);
    assert!(wait_until(Duration::from_secs(2), || {
        !rig.detector.clog_disk_has_fatal_error()
    }));
    shut_down(&rig);
}

#[test]
fn externally_added_events_deduplicate_and_remove_once() {
    let rig = rig_with_sensitivity(0);
    let event = FailureEvent::with_info(
        FailureType::ResourceNotEnough,
        FailureModule::Storage,
        FailureLevel::Serious,
        "data disk almost full",
    );
    rig.detector.add_failure_event(event.clone()).unwrap();
    assert_eq!(
        rig.detector.add_failure_event(event.clone()),
        Err(DetectorError::EntryExists)
    );
    rig.detector.remove_failure_event(&event).unwrap();
    assert_eq!(
        rig.detector.remove_failure_event(&event),
        Err(DetectorError::EntryNotExist)
    );
    shut_down(&rig);
}

#[test]
fn recovery_loop_clears_events_whose_predicate_passes() {
    let rig = rig_with_sensitivity(0);
    let event = FailureEvent::with_info(
        FailureType::ResourceNotEnough,
        FailureModule::Storage,
        FailureLevel::Serious,
        "data disk almost full",
    );
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    rig.detector
        .add_failure_event_with_recovery(
            event.clone(),
            RecoveryPredicate::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 3),
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        rig.detector
            .events_with_level(FailureLevel::Serious)
            .unwrap()
            .is_empty()
    }));
    assert!(polls.load(Ordering::SeqCst) >= 4);
    let recovered = rig.audit.rows_with_tag(TAG_DETECT_RECOVER);
    assert_eq!(recovered.len(), 1);
    assert!(recovered[0].auto_recover);
    assert_eq!(recovered[0].module, FailureModule::Storage);
    shut_down(&rig);
}

#[test]
fn audit_rows_serialize_with_the_table_columns() {
    let rig = rig_with_sensitivity(0);
    rig.state.disk_space_enough.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || !rig.audit.is_empty()));
    let row = &rig.audit.rows()[0];
    let value = serde_json::to_value(row).unwrap();
    assert_eq!(value["event_kind"], "FAILURE_DETECTOR");
    assert_eq!(value["tag"], "clog disk full event");
    assert_eq!(value["module"], "Log");
    assert_eq!(value["failure_type"], "ResourceNotEnough");
    assert_eq!(value["auto_recover"], false);
    shut_down(&rig);
}

#[test]
fn lifecycle_gates_mutations_and_resets_latches() {
    let rig = rig_with_sensitivity(0);
    assert_eq!(rig.detector.start(), Err(DetectorError::InvalidArgument));

    rig.state.disk_space_enough.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || {
        rig.detector.clog_disk_has_fatal_error()
    }));

    rig.detector.stop();
    rig.detector.wait();
    let event = FailureEvent::new(
        FailureType::ResourceNotEnough,
        FailureModule::Storage,
        FailureLevel::Serious,
    );
    assert_eq!(
        rig.detector.add_failure_event(event),
        Err(DetectorError::NotRunning)
    );
    assert_eq!(
        rig.detector.events_with_level(FailureLevel::Fatal),
        Err(DetectorError::NotRunning)
    );

    // Latches survive stop and reset only on destroy.
    assert!(rig.detector.clog_disk_has_fatal_error());
    rig.detector.destroy();
    assert!(!rig.detector.clog_disk_has_fatal_error());
}
