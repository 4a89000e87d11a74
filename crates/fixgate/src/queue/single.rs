// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-lane lock-free queue: one MPMC ring behind the shared queue
//! contract.
//!
//! This is the per-priority building block the egress manager binds to
//! each sender worker: the manager routes by priority, so every instance
//! only ever carries one priority and needs exactly one ring sized to
//! that priority's capacity. Within the lane, order is strictly FIFO; a
//! full ring drops the push (strict drop-on-full policy) and bumps the
//! drop counter.
//!
//! Like [`LanePriorityQueue`](super::LanePriorityQueue), there is no
//! parked pop; [`pop`](super::PriorityQueue::pop) spins with a 100 µs
//! sleep between empty checks, bounded by the caller's timeout.

use std::time::{Duration, Instant};

use super::{LifecycleFlag, PriorityQueue, QueueState, QueueStats};
use crate::core::MpmcRing;
use crate::message::Prioritized;

/// Sleep between empty checks of the ring.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// One MPMC ring satisfying the queue contract.
pub struct SingleLaneQueue<T> {
    ring: MpmcRing<T>,
    lifecycle: LifecycleFlag,
    stats: QueueStats,
}

impl<T: Prioritized> SingleLaneQueue<T> {
    /// Build a queue holding at least `capacity` entries (rounded up to
    /// a power of two by the ring).
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: MpmcRing::with_capacity(capacity),
            lifecycle: LifecycleFlag::new(),
            stats: QueueStats::default(),
        }
    }

    /// Ring capacity (power of two).
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T: Prioritized + Send> PriorityQueue<T> for SingleLaneQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        if self.lifecycle.get() != QueueState::Running {
            self.stats.record_reject();
            return Err(item);
        }

        match self.ring.try_push(item) {
            Ok(()) => {
                self.stats.record_push();
                self.stats.record_len(self.ring.len() as u64);
                Ok(())
            }
            Err(item) => {
                self.stats.record_drop();
                Err(item)
            }
        }
    }

    fn try_pop(&self) -> Option<T> {
        let item = self.ring.try_pop();
        match item {
            Some(_) => self.stats.record_pop(),
            None => {
                if self.lifecycle.get() == QueueState::ShuttingDown {
                    self.lifecycle.advance(QueueState::Drained);
                }
            }
        }
        item
    }

    fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.ring.try_pop() {
                self.stats.record_pop();
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
        self.ring.len()
    }

    fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
