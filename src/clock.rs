//! Monotonic time and periodic background tasks.

use log::info;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sentinel for "no timestamp recorded".
pub const INVALID_TIMESTAMP: i64 = -1;

/// How often a sleeping task re-checks its shutdown flag.
const SHUTDOWN_POLL_SLICE: Duration = Duration::from_millis(25);

/// Monotonic microsecond clock. Timestamps from one clock instance are
/// comparable with each other and with [`INVALID_TIMESTAMP`] only.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Default clock, anchored at construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// Manually advanced clock for deterministic tests.
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: AtomicI64::new(start_us),
        }
    }

    pub fn advance_us(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }

    pub fn set_us(&self, now_us: i64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// A named background task invoked repeatedly with a fixed period.
///
/// `stop` requests cancellation; `wait` joins the worker thread and does not
/// return while the task body is still executing. Missed ticks are coalesced:
/// a body that overruns its period resumes on the next future deadline
/// instead of bursting the backlog.
pub struct PeriodicTask {
    name: String,
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, period: Duration, mut body: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        assert!(!period.is_zero(), "periodic task period must be non-zero");
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }
                    body();
                    let now = Instant::now();
                    if next <= now {
                        let behind = now.duration_since(next).as_nanos();
                        let skipped = behind / period.as_nanos() + 1;
                        next += period.saturating_mul(skipped.min(u32::MAX as u128) as u32);
                    }
                    while !flag.load(Ordering::Relaxed) {
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        thread::sleep(next.duration_since(now).min(SHUTDOWN_POLL_SLICE));
                    }
                    next += period;
                }
            })?;
        Ok(Self {
            name: name.to_string(),
            shutdown,
            join: Some(join),
        })
    }

    /// Requests cancellation; the in-flight invocation keeps running.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Blocks until the worker has exited. Implies [`stop`](Self::stop).
    pub fn wait(&mut self) {
        self.stop();
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                info!("periodic task {} exited by panic", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.wait();
    }
}
