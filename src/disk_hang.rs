//! Adaptive commit-log disk-hang detection.
//!
//! The detector carries no a-priori throughput model. It learns per
//! write-size-bucket bandwidth/latency baselines from healthy operation and
//! raises only when observed behavior diverges persistently and severely
//! from the baseline learned for strictly smaller writes: larger writes must
//! not be slower than smaller ones at equal or lower latency, so when they
//! are, the disk is degrading.

use crate::clock::INVALID_TIMESTAMP;
use crate::services::IoStatistics;
use log::info;
use std::fmt;

/// Evaluations closer together than this return the latched prior verdict.
pub const LOG_DISK_DETECT_INTERVAL_US: i64 = 1_000_000;

/// Escape hatch: a raised verdict older than this clears unconditionally.
pub const LOG_DISK_FAILURE_TIME_UPPER_BOUND_US: i64 = 2 * 60 * 60 * 1_000_000;

/// Average write sizes at or below this floor map to slot 0.
pub const MIN_WRITE_SIZE: f64 = 4096.0;

/// Learned-baseline buckets: 90 mantissa steps per decade, anchored at
/// 4000 B, four decades up to 39 MB.
pub const LEARN_SLOTS: usize = 360;

/// Width of the anomaly-flag window; recovery requires this many
/// consecutive clean rounds.
pub const MIN_RECOVERY_INTERVAL: usize = 60;

const BW_WARN_RATIO: f64 = 0.5;
const SUMMARY_LOG_INTERVAL_US: i64 = 30_000_000;

/// Maps an average write size (bytes) to its learned-baseline slot.
///
/// Log-decade scheme: `slot = 90 * (decade - 3) + (mantissa - 4) / 0.1`,
/// truncating. Monotonic in size; the inverse of [`slot_to_size`].
pub fn size_to_slot(size: f64) -> usize {
    if size <= MIN_WRITE_SIZE {
        return 0;
    }
    let exp = size.log10().floor() as i32;
    let mantissa = size / 10f64.powi(exp);
    let raw = (90 * (exp - 3)) as f64 + (mantissa - 4.0) / 0.1;
    // The epsilon keeps slot_to_size outputs on their own bucket edge.
    let idx = (raw + 1e-6).floor() as i64;
    idx.clamp(0, LEARN_SLOTS as i64 - 1) as usize
}

/// Representative write size (bytes) for a learned-baseline slot.
pub fn slot_to_size(slot: usize) -> f64 {
    debug_assert!(slot < LEARN_SLOTS);
    let mut exp = 3 + (slot / 90) as i32;
    let mut mantissa = 4.0 + 0.1 * (slot % 90) as f64;
    if mantissa >= 10.0 {
        mantissa -= 9.0;
        exp += 1;
    }
    mantissa * 10f64.powi(exp)
}

/// EMA of average bandwidth (B/s) and latency (µs) for one size bucket.
/// Negative means uninitialized.
#[derive(Debug, Clone, Copy)]
struct LearnedBaseline {
    bw: f64,
    rt: f64,
}

impl LearnedBaseline {
    const UNINITIALIZED: Self = Self { bw: -1.0, rt: -1.0 };

    fn is_initialized(&self) -> bool {
        self.bw > 0.0 && self.rt > 0.0
    }

    fn absorb(&mut self, bw: f64, rt: f64) {
        if !self.is_initialized() {
            self.bw = bw;
            self.rt = rt;
        } else {
            self.bw = (bw + 9.0 * self.bw) / 10.0;
            self.rt = (rt + 9.0 * self.rt) / 10.0;
        }
    }
}

/// The learned baseline a scan matched against, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineHit {
    pub bw: f64,
    pub rt: f64,
    pub size: f64,
}

pub struct LogDiskHangDetector {
    last_detect_time_us: i64,
    last_failure_time_us: i64,
    round: i64,
    prev_accum_write_size: i64,
    prev_accum_write_count: i64,
    prev_accum_write_rt_us: i64,
    learned: [LearnedBaseline; LEARN_SLOTS],
    error_flags: [bool; MIN_RECOVERY_INTERVAL],
    last_report_time_us: i64,
}

impl LogDiskHangDetector {
    pub fn new() -> Self {
        Self {
            last_detect_time_us: INVALID_TIMESTAMP,
            last_failure_time_us: INVALID_TIMESTAMP,
            round: 0,
            prev_accum_write_size: 0,
            prev_accum_write_count: 0,
            prev_accum_write_rt_us: 0,
            learned: [LearnedBaseline::UNINITIALIZED; LEARN_SLOTS],
            error_flags: [false; MIN_RECOVERY_INTERVAL],
            last_report_time_us: INVALID_TIMESTAMP,
        }
    }

    /// Latched verdict from the most recent evaluation.
    pub fn is_failing(&self) -> bool {
        self.last_failure_time_us != INVALID_TIMESTAMP
    }

    /// Number of evaluations that actually sampled statistics.
    pub fn evaluation_rounds(&self) -> i64 {
        self.round
    }

    /// True once the bucket for `size` has absorbed a healthy sample.
    pub fn baseline_for(&self, size: f64) -> Option<(f64, f64)> {
        let slot = &self.learned[size_to_slot(size)];
        slot.is_initialized().then_some((slot.bw, slot.rt))
    }

    /// Evaluates the commit-log disk with statistics sampled at `now_us`.
    ///
    /// Calls within [`LOG_DISK_DETECT_INTERVAL_US`] of the previous sample
    /// return the latched verdict and advance nothing. The caller handles
    /// statistics-read failures by not calling this at all.
    pub fn evaluate(
        &mut self,
        now_us: i64,
        stats: &IoStatistics,
        tolerance_time_us: i64,
        sensitivity: i64,
    ) -> bool {
        let has_failure = self.is_failing();
        if self.last_detect_time_us != INVALID_TIMESTAMP
            && now_us - self.last_detect_time_us < LOG_DISK_DETECT_INTERVAL_US
        {
            return has_failure;
        }
        self.last_detect_time_us = now_us;

        let bw_error_ratio = (0.01 * sensitivity as f64).min(0.5);
        let continuous_error_gap = if has_failure {
            MIN_RECOVERY_INTERVAL as i64
        } else {
            tolerance_time_us / LOG_DISK_DETECT_INTERVAL_US
        };

        let this_write_size = stats.accum_write_size - self.prev_accum_write_size;
        let this_write_count = stats.accum_write_count - self.prev_accum_write_count;
        let this_write_rt = stats.accum_write_rt_us - self.prev_accum_write_rt_us;
        self.prev_accum_write_size = stats.accum_write_size;
        self.prev_accum_write_count = stats.accum_write_count;
        self.prev_accum_write_rt_us = stats.accum_write_rt_us;

        let this_avg_bw = if this_write_rt <= 0 {
            0.0
        } else {
            this_write_size as f64 * 1_000_000.0 / this_write_rt as f64
        };
        let this_avg_size = if this_write_count <= 0 {
            0.0
        } else {
            this_write_size as f64 / this_write_count as f64
        };
        let this_avg_rt = if this_write_count <= 0 {
            0.0
        } else {
            this_write_rt as f64 / this_write_count as f64
        };
        let pending_avg_bw = if stats.pending_write_rt_us <= 0 {
            0.0
        } else {
            stats.pending_write_size as f64 * 1_000_000.0 / stats.pending_write_rt_us as f64
        };
        let pending_avg_size = if stats.pending_write_count <= 0 {
            0.0
        } else {
            stats.pending_write_size as f64 / stats.pending_write_count as f64
        };
        let pending_avg_rt = if stats.pending_write_count <= 0 {
            0.0
        } else {
            stats.pending_write_rt_us as f64 / stats.pending_write_count as f64
        };

        // Bandwidth collapse against baselines learned for strictly smaller
        // writes, scanned in descending slot order.
        let mut perf_decrease_warn = false;
        let mut perf_decrease_error = false;
        let mut warn_baseline: Option<BaselineHit> = None;
        let mut error_baseline: Option<BaselineHit> = None;
        if this_write_count > 0 {
            let mut i = size_to_slot(this_avg_size) as i64 - 1;
            while i >= 0 {
                let slot = self.learned[i as usize];
                if !perf_decrease_warn
                    && slot.rt > 0.0
                    && slot.rt < this_avg_rt
                    && slot.bw > 0.0
                    && slot.bw * BW_WARN_RATIO > this_avg_bw
                {
                    perf_decrease_warn = true;
                    warn_baseline = Some(BaselineHit {
                        bw: slot.bw,
                        rt: slot.rt,
                        size: slot_to_size(i as usize),
                    });
                }
                if !perf_decrease_error
                    && slot.rt > 0.0
                    && slot.rt < this_avg_rt
                    && slot.bw > 0.0
                    && slot.bw * bw_error_ratio > this_avg_bw
                {
                    perf_decrease_error = true;
                    error_baseline = Some(BaselineHit {
                        bw: slot.bw,
                        rt: slot.rt,
                        size: slot_to_size(i as usize),
                    });
                }
                if perf_decrease_error {
                    break;
                }
                i -= 1;
            }
        }

        let has_long_pending_io = stats.last_working_time_us != INVALID_TIMESTAMP
            && now_us - stats.last_working_time_us > tolerance_time_us;

        // Stalled small writes: pending I/O lingering past the detect
        // interval while the combined throughput sits far under a baseline
        // learned for smaller writes.
        let check_small_pending_io = pending_avg_rt > LOG_DISK_DETECT_INTERVAL_US as f64
            && !has_long_pending_io
            && !perf_decrease_error;
        let mut has_small_pending_io = false;
        if check_small_pending_io {
            let mut i = size_to_slot(pending_avg_size) as i64 - 1;
            while i >= 0 {
                let slot = self.learned[i as usize];
                if slot.bw > 0.0 && slot.bw * bw_error_ratio > this_avg_bw + pending_avg_bw {
                    has_small_pending_io = true;
                    error_baseline = Some(BaselineHit {
                        bw: slot.bw,
                        rt: slot.rt,
                        size: slot_to_size(i as usize),
                    });
                    break;
                }
                i -= 1;
            }
        }

        self.error_flags[(self.round % MIN_RECOVERY_INTERVAL as i64) as usize] =
            perf_decrease_error || has_small_pending_io || has_long_pending_io;
        let has_continuous_error = self.has_continuous_error(has_failure, continuous_error_gap);

        // Never learn from a round that looks anomalous or while failing.
        if !perf_decrease_warn
            && !perf_decrease_error
            && !has_small_pending_io
            && !has_long_pending_io
            && !has_failure
        {
            self.learned[size_to_slot(this_avg_size)].absorb(this_avg_bw, this_avg_rt);
        }

        let verdict = if !has_failure {
            if ((has_small_pending_io || perf_decrease_error) && has_continuous_error)
                || has_long_pending_io
            {
                self.last_failure_time_us = now_us;
                true
            } else {
                false
            }
        } else if !has_small_pending_io
            && !has_long_pending_io
            && (sensitivity == 0
                || (!perf_decrease_error && !has_continuous_error)
                || now_us - self.last_failure_time_us > LOG_DISK_FAILURE_TIME_UPPER_BOUND_US)
        {
            false
        } else {
            true
        };

        let any_signal = perf_decrease_warn
            || perf_decrease_error
            || has_small_pending_io
            || has_long_pending_io;
        if has_failure != verdict
            || any_signal
            || now_us - self.last_report_time_us >= SUMMARY_LOG_INTERVAL_US
        {
            self.last_report_time_us = now_us;
            info!(
                "log disk hang evaluation finished: verdict={} was_failing={} \
                 perf_warn={} perf_error={} small_pending={} long_pending={} \
                 continuous_error={} sensitivity={} tolerance_us={} \
                 this_bw={:.0} this_rt={:.0} this_size={:.0} pending_bw={:.0} \
                 warn_baseline={:?} error_baseline={:?} detector={:?}",
                verdict,
                has_failure,
                perf_decrease_warn,
                perf_decrease_error,
                has_small_pending_io,
                has_long_pending_io,
                has_continuous_error,
                sensitivity,
                tolerance_time_us,
                this_avg_bw,
                this_avg_rt,
                this_avg_size,
                pending_avg_bw,
                warn_baseline,
                error_baseline,
                self,
            );
        }
        self.round += 1;

        if !verdict {
            self.last_failure_time_us = INVALID_TIMESTAMP;
        }
        verdict
    }

    fn has_continuous_error(&self, has_failure: bool, gap: i64) -> bool {
        let mut error_count = 0i64;
        let mut i = self.round;
        while i >= 0 && i > self.round - gap {
            if self.error_flags[(i % MIN_RECOVERY_INTERVAL as i64) as usize] {
                error_count += 1;
            }
            i -= 1;
        }
        if has_failure {
            error_count != 0
        } else {
            error_count > gap / 2
        }
    }
}

impl Default for LogDiskHangDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LogDiskHangDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initialized = self.learned.iter().filter(|s| s.is_initialized()).count();
        f.debug_struct("LogDiskHangDetector")
            .field("last_detect_time_us", &self.last_detect_time_us)
            .field("last_failure_time_us", &self.last_failure_time_us)
            .field("round", &self.round)
            .field("initialized_slots", &initialized)
            .finish()
    }
}
