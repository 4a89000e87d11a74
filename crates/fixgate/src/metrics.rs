// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway metrics: counters, gauges, latency recorders.
//!
//! Everything here is relaxed atomics — cheap enough for hot paths,
//! readable from a monitoring thread at any time, never a
//! synchronization channel. Latency percentiles come from a bounded
//! sample reservoir snapshotted on demand.
//!
//! # Example
//!
//! ```
//! use fixgate::metrics::{Counter, LatencyRecorder};
//!
//! let parses = Counter::new();
//! parses.increment();
//!
//! let latency = LatencyRecorder::new(1024);
//! latency.record(750);
//! let snap = latency.snapshot();
//! assert_eq!(snap.count, 1);
//! assert_eq!(snap.max_ns, 750);
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock;

// ============================================================================
// Counter
// ============================================================================

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Gauge
// ============================================================================

/// Instantaneous signed value (queue depth, in-flight count).
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Latency recorder
// ============================================================================

/// Point-in-time view of a [`LatencyRecorder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
}

/// Nanosecond latency tracker with percentile estimation.
///
/// Min/max/sum are exact over all samples; percentiles are computed from
/// a bounded ring of the most recent samples (capacity rounded up to a
/// power of two). Recording is wait-free: one fetch_add plus three
/// relaxed stores.
#[derive(Debug)]
pub struct LatencyRecorder {
    samples: Box<[AtomicU64]>,
    mask: usize,
    cursor: AtomicUsize,

    count: AtomicU64,
    sum_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl LatencyRecorder {
    /// Create a recorder keeping the most recent `window` samples for
    /// percentile estimation.
    ///
    /// # Panics
    /// Panics if `window` is zero.
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "latency window must be > 0");
        let capacity = window.next_power_of_two();
        let samples: Box<[AtomicU64]> = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Self {
            samples,
            mask: capacity - 1,
            cursor: AtomicUsize::new(0),
            count: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    /// Record one latency sample in nanoseconds.
    #[inline]
    pub fn record(&self, nanos: u64) {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) & self.mask;
        self.samples[slot].store(nanos, Ordering::Relaxed);

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(nanos, Ordering::Relaxed);
        self.min_ns.fetch_min(nanos, Ordering::Relaxed);
        self.max_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Compute a snapshot; sorts the current sample window.
    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return LatencySnapshot::default();
        }

        let filled = (count as usize).min(self.samples.len());
        let mut window: Vec<u64> = self.samples[..filled]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect();
        window.sort_unstable();

        let percentile = |p: f64| -> u64 {
            let rank = ((window.len() as f64) * p).ceil() as usize;
            window[rank.clamp(1, window.len()) - 1]
        };

        LatencySnapshot {
            count,
            min_ns: self.min_ns.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
            mean_ns: self.sum_ns.load(Ordering::Relaxed) / count,
            p50_ns: percentile(0.50),
            p99_ns: percentile(0.99),
        }
    }

    /// Clear all samples and aggregates.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.sum_ns.store(0, Ordering::Relaxed);
        self.min_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Scoped timer
// ============================================================================

/// Measures the span from construction to drop and records it.
///
/// ```
/// use fixgate::metrics::{LatencyRecorder, ScopedTimer};
/// use std::sync::Arc;
///
/// let recorder = Arc::new(LatencyRecorder::new(64));
/// {
///     let _timer = ScopedTimer::new(Arc::clone(&recorder));
///     // measured work
/// }
/// assert_eq!(recorder.count(), 1);
/// ```
pub struct ScopedTimer {
    recorder: Arc<LatencyRecorder>,
    start_ns: u64,
}

impl ScopedTimer {
    pub fn new(recorder: Arc<LatencyRecorder>) -> Self {
        Self {
            recorder,
            start_ns: clock::now_nanos(),
        }
    }

    /// Nanoseconds elapsed so far without stopping the timer.
    pub fn elapsed_ns(&self) -> u64 {
        clock::now_nanos().saturating_sub(self.start_ns)
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.recorder.record(self.elapsed_ns());
    }
}

// ============================================================================
// Gateway rollup
// ============================================================================

/// One struct wiring the per-stage metrics a gateway process exposes.
///
/// Components keep their own counters; this rollup exists so monitoring
/// has a single place to read the cross-cutting numbers (parse latency,
/// queue latency, end-to-end send latency).
#[derive(Debug)]
pub struct GatewayMetrics {
    /// Inbound messages decoded.
    pub messages_decoded: Counter,
    /// Outbound messages delivered.
    pub messages_delivered: Counter,
    /// Outbound messages that gave up after retries.
    pub messages_failed: Counter,
    /// In-flight pool allocations.
    pub pool_in_use: Gauge,
    /// Parse call latency.
    pub parse_latency: LatencyRecorder,
    /// Queue-entry to send latency.
    pub queue_latency: LatencyRecorder,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            messages_decoded: Counter::new(),
            messages_delivered: Counter::new(),
            messages_failed: Counter::new(),
            pool_in_use: Gauge::new(),
            parse_latency: LatencyRecorder::new(4096),
            queue_latency: LatencyRecorder::new(4096),
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        c.increment();
        c.add(9);
        assert_eq!(c.get(), 10);
        c.reset();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn test_gauge() {
        let g = Gauge::new();
        g.increment();
        g.increment();
        g.decrement();
        assert_eq!(g.get(), 1);
        g.set(-5);
        assert_eq!(g.get(), -5);
    }

    #[test]
    fn test_latency_empty_snapshot() {
        let r = LatencyRecorder::new(16);
        assert_eq!(r.snapshot(), LatencySnapshot::default());
    }

    #[test]
    fn test_latency_aggregates() {
        let r = LatencyRecorder::new(16);
        for nanos in [100, 200, 300, 400] {
            r.record(nanos);
        }
        let snap = r.snapshot();
        assert_eq!(snap.count, 4);
        assert_eq!(snap.min_ns, 100);
        assert_eq!(snap.max_ns, 400);
        assert_eq!(snap.mean_ns, 250);
        assert_eq!(snap.p50_ns, 200);
        assert_eq!(snap.p99_ns, 400);
    }

    #[test]
    fn test_latency_window_wraps() {
        let r = LatencyRecorder::new(4);
        for nanos in 1..=100u64 {
            r.record(nanos);
        }
        let snap = r.snapshot();
        // Aggregates are exact over all samples...
        assert_eq!(snap.count, 100);
        assert_eq!(snap.min_ns, 1);
        assert_eq!(snap.max_ns, 100);
        // ...while percentiles come from the last window only.
        assert!(snap.p50_ns >= 97, "p50 {} not from recent window", snap.p50_ns);
    }

    #[test]
    fn test_latency_reset() {
        let r = LatencyRecorder::new(8);
        r.record(42);
        r.reset();
        assert_eq!(r.snapshot(), LatencySnapshot::default());
    }

    #[test]
    fn test_scoped_timer_records_on_drop() {
        let recorder = Arc::new(LatencyRecorder::new(8));
        {
            let timer = ScopedTimer::new(Arc::clone(&recorder));
            std::thread::sleep(std::time::Duration::from_millis(1));
            assert!(timer.elapsed_ns() > 0);
        }
        assert_eq!(recorder.count(), 1);
        assert!(recorder.snapshot().max_ns >= 1_000_000);
    }

    #[test]
    fn test_concurrent_recording() {
        let r = Arc::new(LatencyRecorder::new(256));
        std::thread::scope(|s| {
            for _ in 0..4 {
                let r = Arc::clone(&r);
                s.spawn(move || {
                    for i in 0..1_000 {
                        r.record(i);
                    }
                });
            }
        });
        assert_eq!(r.count(), 4_000);
        assert_eq!(r.snapshot().max_ns, 999);
    }

    #[test]
    fn test_gateway_rollup() {
        let m = GatewayMetrics::new();
        m.messages_decoded.increment();
        m.pool_in_use.increment();
        m.parse_latency.record(500);
        assert_eq!(m.messages_decoded.get(), 1);
        assert_eq!(m.parse_latency.snapshot().count, 1);
    }
}
