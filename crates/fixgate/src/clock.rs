// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic nanosecond clock anchored at a process-wide epoch.
//!
//! All latency-sensitive timestamps in the crate (message lifecycle marks,
//! parser statistics, queue latency samples) are `u64` nanoseconds measured
//! from a single epoch captured on first use. Storing plain integers keeps
//! the hot path at one `Instant::elapsed` call and lets timestamps live in
//! atomics without conversion.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the process epoch.
///
/// The epoch is captured lazily on the first call; all subsequent calls are
/// measured against the same anchor, so values are directly comparable
/// across threads.
#[inline]
pub fn now_nanos() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    // u64 nanos covers ~584 years of uptime; truncation is not a concern.
    epoch.elapsed().as_nanos() as u64
}

/// Convert a nanosecond delta into whole microseconds (stats reporting).
#[inline]
pub fn nanos_to_micros(nanos: u64) -> u64 {
    nanos / 1_000
}
