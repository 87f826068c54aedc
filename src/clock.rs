//! The `clock` module returns time values derived from the platform
//! monotonic clock.
//!
//! - [monotonic()] - monotonic time in seconds
//! - [monotonic64()] - monotonic time in nanoseconds
//!
//! Monotonic time is not affected by wall-clock adjustments, which makes it
//! the right clock for timeouts and benchmarks. The epoch is the first use of
//! the clock within the process.

use once_cell::sync::OnceCell;
use std::time::Instant;

static EPOCH: OnceCell<Instant> = OnceCell::new();

fn elapsed() -> std::time::Duration {
    EPOCH.get_or_init(Instant::now).elapsed()
}

/// The monotonic time in seconds since the process-local epoch.
#[inline(always)]
pub fn monotonic() -> f64 {
    elapsed().as_secs_f64()
}

/// See: [monotonic()]
#[inline(always)]
pub fn monotonic64() -> u64 {
    elapsed().as_nanos() as u64
}
