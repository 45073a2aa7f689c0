//! Timestamping - monotonic nanoseconds and a calibrated cycle counter.
//!
//! `now_ns` stamps wire events; the TSC path exists for intra-operation
//! latency measurement, converted through a factor sampled once at
//! startup against the monotonic clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// f64 factors stored as bits so calibration is a plain atomic publish.
static TSC_TO_NS: AtomicU64 = AtomicU64::new(0x3FF0_0000_0000_0000); // 1.0
static NS_TO_TSC: AtomicU64 = AtomicU64::new(0x3FF0_0000_0000_0000);

/// Current monotonic time in nanoseconds.
#[inline]
pub fn now_ns() -> u64 {
    #[cfg(target_os = "linux")]
    {
        use nix::time::{clock_gettime, ClockId};
        if let Ok(ts) = clock_gettime(ClockId::CLOCK_MONOTONIC) {
            return (ts.tv_sec() as u64) * 1_000_000_000 + (ts.tv_nsec() as u64);
        }
    }
    // Portable fallback
    static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    START.elapsed().as_nanos() as u64
}

/// Raw cycle counter. Falls back to the monotonic clock off x86_64,
/// which keeps the conversion factors trivially correct there.
#[inline]
pub fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        now_ns()
    }
}

/// Sample the cycle counter against the monotonic clock across a ~100ms
/// busy-wait and publish the cycle<->ns conversion factors. Call once at
/// startup, before any latency measurement.
pub fn calibrate() {
    let wall_start = Instant::now();
    let tsc_start = rdtsc();

    while wall_start.elapsed() < Duration::from_millis(100) {
        std::hint::spin_loop();
    }

    let tsc_diff = rdtsc().wrapping_sub(tsc_start);
    let ns_diff = wall_start.elapsed().as_nanos() as u64;
    if tsc_diff == 0 || ns_diff == 0 {
        return;
    }

    let tsc_to_ns = ns_diff as f64 / tsc_diff as f64;
    TSC_TO_NS.store(tsc_to_ns.to_bits(), Ordering::Relaxed);
    NS_TO_TSC.store((1.0 / tsc_to_ns).to_bits(), Ordering::Relaxed);
}

#[inline]
pub fn cycles_to_ns(cycles: u64) -> u64 {
    (cycles as f64 * f64::from_bits(TSC_TO_NS.load(Ordering::Relaxed))) as u64
}

#[inline]
pub fn ns_to_cycles(ns: u64) -> u64 {
    (ns as f64 * f64::from_bits(NS_TO_TSC.load(Ordering::Relaxed))) as u64
}

/// Cycle-based stopwatch for spot latency measurements.
pub struct LatencyTimer {
    start: u64,
}

impl LatencyTimer {
    pub fn start() -> Self {
        Self { start: rdtsc() }
    }

    pub fn elapsed_cycles(&self) -> u64 {
        rdtsc().wrapping_sub(self.start)
    }

    pub fn elapsed_ns(&self) -> u64 {
        cycles_to_ns(self.elapsed_cycles())
    }

    pub fn reset(&mut self) {
        self.start = rdtsc();
    }
}
