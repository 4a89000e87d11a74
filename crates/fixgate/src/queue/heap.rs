// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking priority queue: bounded max-heap under a mutex.
//!
//! Ordering is (priority descending, arrival ascending): among equal
//! priorities the earliest push pops first. Two condition variables carry
//! the not-empty / not-full signals; the overflow policy decides what a
//! full queue does with an incoming push.

use std::collections::BinaryHeap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{LifecycleFlag, PriorityQueue, QueueState, QueueStats};
use crate::clock;
use crate::config::OverflowPolicy;
use crate::message::{Prioritized, Priority};

/// Heap entry: priority plus a monotone arrival sequence for FIFO
/// tie-breaking.
struct Entry<T> {
    priority: Priority,
    arrival: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.arrival == other.arrival
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier arrival first.
        self.priority
            .cmp(&other.priority)
            .then(other.arrival.cmp(&self.arrival))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_arrival: u64,
}

/// Bounded, mutex-protected priority queue with blocking pop.
pub struct HeapPriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    push_timeout: Duration,
    lifecycle: LifecycleFlag,
    stats: QueueStats,
}

impl<T: Prioritized> HeapPriorityQueue<T> {
    /// Create a queue holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, policy: OverflowPolicy, push_timeout: Duration) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                next_arrival: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            push_timeout,
            lifecycle: LifecycleFlag::new(),
            stats: QueueStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evict the entry that DropOldest sacrifices: lowest priority, and
    /// among those the most recent arrival, so older same-priority
    /// traffic keeps its place in line.
    ///
    /// BinaryHeap has no efficient arbitrary removal; overflow is the
    /// slow path, so the O(n) rebuild is confined to it.
    fn evict_one(inner: &mut Inner<T>) -> Option<T> {
        let entries = std::mem::take(&mut inner.heap).into_vec();
        let victim_idx = entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.arrival.cmp(&b.arrival).reverse())
            })
            .map(|(i, _)| i)?;

        let mut victim = None;
        let mut rebuilt = BinaryHeap::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            if i == victim_idx {
                victim = Some(entry.item);
            } else {
                rebuilt.push(entry);
            }
        }
        inner.heap = rebuilt;
        victim
    }

    fn pop_locked(&self, inner: &mut Inner<T>) -> Option<T> {
        let entry = inner.heap.pop()?;
        self.stats.record_pop();
        self.not_full.notify_one();
        Some(entry.item)
    }
}

impl<T: Prioritized + Send> PriorityQueue<T> for HeapPriorityQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        let start = clock::now_nanos();

        if self.lifecycle.get() != QueueState::Running {
            self.stats.record_reject();
            return Err(item);
        }

        let mut inner = self.inner.lock();

        if inner.heap.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    if Self::evict_one(&mut inner).is_some() {
                        self.stats.record_drop();
                    }
                }
                OverflowPolicy::DropNewest | OverflowPolicy::Reject => {
                    self.stats.record_reject();
                    return Err(item);
                }
                OverflowPolicy::Block => {
                    let deadline = std::time::Instant::now() + self.push_timeout;
                    while inner.heap.len() >= self.capacity {
                        if self.lifecycle.get() != QueueState::Running {
                            self.stats.record_reject();
                            return Err(item);
                        }
                        let timed_out = self
                            .not_full
                            .wait_until(&mut inner, deadline)
                            .timed_out();
                        if timed_out && inner.heap.len() >= self.capacity {
                            self.stats.record_reject();
                            return Err(item);
                        }
                    }
                }
            }
        }

        let arrival = inner.next_arrival;
        inner.next_arrival += 1;
        inner.heap.push(Entry {
            priority: item.priority(),
            arrival,
            item,
        });

        self.stats.record_push();
        self.stats.record_len(inner.heap.len() as u64);
        self.stats
            .record_push_latency(clock::now_nanos().saturating_sub(start));

        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = self.pop_locked(&mut inner);
        if item.is_none() && self.lifecycle.get() == QueueState::ShuttingDown {
            self.lifecycle.advance(QueueState::Drained);
        }
        item
    }

    fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if let Some(item) = self.pop_locked(&mut inner) {
                return Some(item);
            }
            match self.lifecycle.get() {
                QueueState::Running => {}
                _ => {
                    self.lifecycle.advance(QueueState::Drained);
                    return None;
                }
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out()
                && inner.heap.is_empty()
            {
                return None;
            }
        }
    }

    fn shutdown(&self) {
        self.lifecycle.advance(QueueState::ShuttingDown);
        // Wake everything: parked consumers drain or observe Drained,
        // blocked producers give up.
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn state(&self) -> QueueState {
        self.lifecycle.get()
    }

    fn len(&self) -> usize {
        self.inner.lock().heap.len()
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

    fn queue(capacity: usize, policy: OverflowPolicy) -> HeapPriorityQueue<Arc<Message>> {
        HeapPriorityQueue::new(capacity, policy, Duration::from_millis(20))
    }

    #[test]
    fn test_priority_ordering() {
        let q = queue(8, OverflowPolicy::Reject);
        q.push(msg("low", Priority::Low)).expect("push low");
        q.push(msg("crit", Priority::Critical)).expect("push crit");
        q.push(msg("med", Priority::Medium)).expect("push med");
        q.push(msg("high", Priority::High)).expect("push high");

        let order: Vec<String> = std::iter::from_fn(|| q.try_pop())
            .map(|m| m.message_id().to_string())
            .collect();
        assert_eq!(order, ["crit", "high", "med", "low"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let q = queue(8, OverflowPolicy::Reject);
        for id in ["a", "b", "c"] {
            q.push(msg(id, Priority::High)).expect("push");
        }
        let order: Vec<String> = std::iter::from_fn(|| q.try_pop())
            .map(|m| m.message_id().to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_reject_when_full() {
        let q = queue(2, OverflowPolicy::Reject);
        q.push(msg("a", Priority::Low)).expect("push");
        q.push(msg("b", Priority::Low)).expect("push");
        assert!(q.push(msg("c", Priority::Low)).is_err());
        assert_eq!(q.stats().rejected(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_drop_newest_when_full() {
        let q = queue(2, OverflowPolicy::DropNewest);
        q.push(msg("a", Priority::Low)).expect("push");
        q.push(msg("b", Priority::Low)).expect("push");
        assert!(q.push(msg("c", Priority::Critical)).is_err());
        // Existing entries untouched.
        assert_eq!(
            q.try_pop().expect("queue has entries").message_id(),
            "a"
        );
    }

    #[test]
    fn test_drop_oldest_evicts_lowest_priority_latest_arrival() {
        let q = queue(3, OverflowPolicy::DropOldest);
        q.push(msg("low_early", Priority::Low)).expect("push");
        q.push(msg("low_late", Priority::Low)).expect("push");
        q.push(msg("high", Priority::High)).expect("push");

        // Full; the incoming CRITICAL evicts low_late (lowest priority,
        // most recent arrival).
        q.push(msg("crit", Priority::Critical)).expect("push with eviction");
        assert_eq!(q.stats().dropped(), 1);

        let order: Vec<String> = std::iter::from_fn(|| q.try_pop())
            .map(|m| m.message_id().to_string())
            .collect();
        assert_eq!(order, ["crit", "high", "low_early"]);
    }

    #[test]
    fn test_block_policy_times_out() {
        let q = queue(1, OverflowPolicy::Block);
        q.push(msg("a", Priority::Low)).expect("push");

        let start = std::time::Instant::now();
        assert!(q.push(msg("b", Priority::Low)).is_err());
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(q.stats().rejected(), 1);
    }

    #[test]
    fn test_block_policy_unblocks_on_pop() {
        let q = Arc::new(HeapPriorityQueue::new(
            1,
            OverflowPolicy::Block,
            Duration::from_secs(5),
        ));
        q.push(msg("a", Priority::Low)).expect("push");

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.push(msg("b", Priority::Low)).is_ok())
        };

        std::thread::sleep(Duration::from_millis(10));
        assert!(q.try_pop().is_some());
        assert!(producer.join().expect("producer should not panic"));
    }

    #[test]
    fn test_blocking_pop_wakes_on_push() {
        let q = Arc::new(queue(4, OverflowPolicy::Reject));

        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(10));
        q.push(msg("wake", Priority::High)).expect("push");

        let got = consumer.join().expect("consumer should not panic");
        assert_eq!(got.expect("pop should yield").message_id(), "wake");
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let q = queue(4, OverflowPolicy::Reject);
        let start = std::time::Instant::now();
        assert!(q.pop(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_shutdown_refuses_push_drains_pop() {
        let q = queue(4, OverflowPolicy::Reject);
        q.push(msg("a", Priority::Low)).expect("push");
        q.push(msg("b", Priority::High)).expect("push");

        q.shutdown();
        assert_eq!(q.state(), QueueState::ShuttingDown);
        assert!(q.push(msg("c", Priority::Critical)).is_err());

        // Residual items drain in priority order.
        assert_eq!(q.try_pop().expect("residual").message_id(), "b");
        assert_eq!(q.try_pop().expect("residual").message_id(), "a");
        assert!(q.try_pop().is_none());
        assert_eq!(q.state(), QueueState::Drained);
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let q = Arc::new(queue(4, OverflowPolicy::Reject));
        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(10));
        q.shutdown();
        assert!(consumer.join().expect("consumer should not panic").is_none());
    }

    #[test]
    fn test_peak_len_recorded() {
        let q = queue(8, OverflowPolicy::Reject);
        for i in 0..5 {
            q.push(msg(&format!("m{}", i), Priority::Low)).expect("push");
        }
        assert_eq!(q.stats().peak_len(), 5);
        while q.try_pop().is_some() {}
        assert_eq!(q.stats().peak_len(), 5);
    }
}
