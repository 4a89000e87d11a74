// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free priority queue: four independent rings, one per priority.
//!
//! Push lands in the lane matching the item's priority; pop scans lanes
//! Critical → High → Medium → Low and returns the first dequeue. Within a
//! lane, order is strictly FIFO; across lanes only the priority ordering
//! is guaranteed. A full lane drops the push (strict drop-on-full policy)
//! and bumps the drop counter.
//!
//! There is no parked pop. [`pop`](super::PriorityQueue::pop) busy-scans
//! with a 100 µs sleep between empty sweeps, bounded by the caller's
//! timeout.

use std::time::{Duration, Instant};

use super::{LifecycleFlag, PriorityQueue, QueueState, QueueStats};
use crate::config::QueueConfig;
use crate::core::MpmcRing;
use crate::message::{Prioritized, Priority};

/// Sleep between empty sweeps of all four lanes.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Four-lane lock-free priority queue.
pub struct LanePriorityQueue<T> {
    /// Indexed by `Priority::lane()` (0 = Low .. 3 = Critical).
    lanes: [MpmcRing<T>; 4],
    lifecycle: LifecycleFlag,
    stats: QueueStats,
}

impl<T: Prioritized> LanePriorityQueue<T> {
    /// Build lanes with per-priority capacities (rounded up to powers of
    /// two by the ring).
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            lanes: [
                MpmcRing::with_capacity(config.low_capacity),
                MpmcRing::with_capacity(config.medium_capacity),
                MpmcRing::with_capacity(config.high_capacity),
                MpmcRing::with_capacity(config.critical_capacity),
            ],
            lifecycle: LifecycleFlag::new(),
            stats: QueueStats::default(),
        }
    }

    /// Capacity of the lane serving `priority`.
    pub fn lane_capacity(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].capacity()
    }

    /// Occupancy of the lane serving `priority` (racy, diagnostics only).
    pub fn lane_len(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].len()
    }

    fn scan_lanes(&self) -> Option<T> {
        for priority in Priority::DESCENDING {
            if let Some(item) = self.lanes[priority.lane()].try_pop() {
                self.stats.record_pop();
                return Some(item);
            }
        }
        None
    }
}

impl<T: Prioritized + Send> PriorityQueue<T> for LanePriorityQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        if self.lifecycle.get() != QueueState::Running {
            self.stats.record_reject();
            return Err(item);
        }

        let lane = &self.lanes[item.priority().lane()];
        match lane.try_push(item) {
            Ok(()) => {
                self.stats.record_push();
                self.stats.record_len(self.len() as u64);
                Ok(())
            }
            Err(item) => {
                self.stats.record_drop();
                Err(item)
            }
        }
    }

    fn try_pop(&self) -> Option<T> {
        let item = self.scan_lanes();
        if item.is_none() && self.lifecycle.get() == QueueState::ShuttingDown {
            self.lifecycle.advance(QueueState::Drained);
        }
        item
    }

    fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.scan_lanes() {
                return Some(item);
            }
            match self.lifecycle.get() {
                QueueState::Running => {}
                _ => {
                    self.lifecycle.advance(QueueState::Drained);
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    fn shutdown(&self) {
        self.lifecycle.advance(QueueState::ShuttingDown);
    }

    fn state(&self) -> QueueState {
        self.lifecycle.get()
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(MpmcRing::len).sum()
    }

    fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageKind};
    use std::sync::Arc;

    fn msg(id: &str, priority: Priority) -> Arc<Message> {
        Arc::new(Message::new(id, Vec::new(), priority, MessageKind::Order))
    }

    fn small_config() -> QueueConfig {
        QueueConfig {
            critical_capacity: 4,
            high_capacity: 4,
            medium_capacity: 4,
            low_capacity: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_strict_priority_draining() {
        // Push LOW, MEDIUM, HIGH, CRITICAL in that order; pops must
        // come back CRITICAL, HIGH, MEDIUM, LOW.
        let q = LanePriorityQueue::new(&small_config());
        for (id, p) in [
            ("low", Priority::Low),
            ("med", Priority::Medium),
            ("high", Priority::High),
            ("crit", Priority::Critical),
        ] {
            q.push(msg(id, p)).expect("push should succeed");
        }

        let order: Vec<String> = std::iter::from_fn(|| q.try_pop())
            .map(|m| m.message_id().to_string())
            .collect();
        assert_eq!(order, ["crit", "high", "med", "low"]);
    }

    #[test]
    fn test_fifo_within_lane() {
        let q = LanePriorityQueue::new(&small_config());
        for id in ["a", "b", "c"] {
            q.push(msg(id, Priority::Medium)).expect("push");
        }
        let order: Vec<String> = std::iter::from_fn(|| q.try_pop())
            .map(|m| m.message_id().to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_full_lane_drops() {
        let q = LanePriorityQueue::new(&small_config());
        for i in 0..4 {
            q.push(msg(&format!("m{}", i), Priority::Low))
                .expect("lane has room");
        }
        assert!(q.push(msg("overflow", Priority::Low)).is_err());
        assert_eq!(q.stats().dropped(), 1);

        // Other lanes are unaffected.
        q.push(msg("crit", Priority::Critical))
            .expect("critical lane independent of low lane");
    }

    #[test]
    fn test_len_sums_lanes() {
        let q = LanePriorityQueue::new(&small_config());
        q.push(msg("a", Priority::Low)).expect("push");
        q.push(msg("b", Priority::Critical)).expect("push");
        q.push(msg("c", Priority::High)).expect("push");
        assert_eq!(q.len(), 3);
        assert_eq!(q.lane_len(Priority::Low), 1);
        assert_eq!(q.lane_len(Priority::Medium), 0);
    }

    #[test]
    fn test_pop_waits_for_arrival() {
        let q = Arc::new(LanePriorityQueue::new(&small_config()));
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop(Duration::from_secs(2)))
        };

        std::thread::sleep(Duration::from_millis(5));
        q.push(msg("late", Priority::High)).expect("push");

        let got = consumer.join().expect("consumer should not panic");
        assert_eq!(got.expect("pop should yield").message_id(), "late");
    }

    #[test]
    fn test_pop_times_out_empty() {
        let q: LanePriorityQueue<Arc<Message>> = LanePriorityQueue::new(&small_config());
        let start = Instant::now();
        assert!(q.pop(Duration::from_millis(10)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_shutdown_drains_residual() {
        let q = LanePriorityQueue::new(&small_config());
        q.push(msg("a", Priority::Low)).expect("push");
        q.push(msg("b", Priority::Critical)).expect("push");

        q.shutdown();
        assert!(q.push(msg("c", Priority::High)).is_err());
        assert_eq!(q.state(), QueueState::ShuttingDown);

        assert_eq!(q.try_pop().expect("residual").message_id(), "b");
        assert_eq!(q.try_pop().expect("residual").message_id(), "a");
        assert!(q.try_pop().is_none());
        assert_eq!(q.state(), QueueState::Drained);
    }

    #[test]
    fn test_concurrent_producers_priority_respected() {
        let q = Arc::new(LanePriorityQueue::new(&QueueConfig {
            critical_capacity: 1024,
            high_capacity: 1024,
            medium_capacity: 1024,
            low_capacity: 1024,
            ..Default::default()
        }));

        std::thread::scope(|s| {
            for p in [Priority::Low, Priority::Medium, Priority::High, Priority::Critical] {
                let q = Arc::clone(&q);
                s.spawn(move || {
                    for i in 0..200 {
                        q.push(msg(&format!("{}-{}", p, i), p))
                            .expect("lane has room");
                    }
                });
            }
        });

        assert_eq!(q.len(), 800);

        // Any pop while a higher-priority item is present must not yield
        // a lower-priority one.
        let mut last = Priority::Critical;
        while let Some(m) = q.try_pop() {
            assert!(
                m.priority() <= last,
                "priority inversion: {} after {}",
                m.priority(),
                last
            );
            last = m.priority();
        }
    }
}
