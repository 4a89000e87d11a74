// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded multi-producer multi-consumer ring buffer.
//!
//! Each slot carries a lap sequence that coordinates producer publication
//! with consumer consumption: a producer claims a slot by CAS on the tail,
//! writes the value, then bumps the slot sequence to publish; a consumer
//! claims by CAS on the head and bumps the sequence by a full lap to hand
//! the slot back. Head and tail live on separate cache lines.
//!
//! Capacity is rounded up to a power of two so wrapping is a mask, not a
//! division.
//!
//! # Performance
//!
//! - push: one CAS + one release store on the uncontended path
//! - pop: one CAS + one release store

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::{Backoff, CachePadded};

struct Cell<T> {
    /// Lap sequence. `seq == pos` means writable for the producer that
    /// claims `pos`; `seq == pos + 1` means readable for the consumer
    /// that claims `pos`.
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring of power-of-two capacity.
pub struct MpmcRing<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,

    /// Next position to enqueue at.
    tail: CachePadded<AtomicUsize>,

    /// Next position to dequeue from.
    head: CachePadded<AtomicUsize>,
}

// SAFETY: slot access is serialized by the sequence protocol; a value is
// only written by the producer that claimed the position and only read by
// the consumer that claimed it afterwards.
unsafe impl<T: Send> Send for MpmcRing<T> {}
unsafe impl<T: Send> Sync for MpmcRing<T> {}

impl<T> MpmcRing<T> {
    /// Create a ring with at least `capacity` slots (rounded up to the
    /// next power of two).
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");
        let capacity = capacity.next_power_of_two();

        let buffer: Box<[Cell<T>]> = (0..capacity)
            .map(|i| Cell {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            buffer,
            mask: capacity - 1,
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Slot count (power of two).
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Enqueue `value`. Returns `false` (giving the value back is not
    /// possible once moved, so the caller passes ownership only on
    /// success) — see [`try_push`](Self::try_push).
    ///
    /// This is the non-blocking MPMC push: full ring fails immediately.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut pos = self.tail.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.seq.load(Ordering::Acquire);

            if seq == pos {
                // Slot is writable for this lap; claim the position.
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the tail CAS grants exclusive
                        // write access to this slot for this lap.
                        unsafe {
                            (*cell.value.get()).write(value);
                        }
                        cell.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if seq.wrapping_sub(pos) as isize > 0 {
                // Another producer already filled this position; chase the
                // tail forward.
                pos = self.tail.load(Ordering::Relaxed);
                backoff.spin();
            } else {
                // seq < pos: the consumer has not freed this slot yet.
                return Err(value);
            }
        }
    }

    /// Dequeue one value if available.
    pub fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut pos = self.head.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.seq.load(Ordering::Acquire);
            let expected = pos.wrapping_add(1);

            if seq == expected {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the head CAS grants exclusive
                        // read access; the producer published with the
                        // Release store we Acquire-loaded above.
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        // Hand the slot to the producer one lap ahead.
                        cell.seq
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if seq.wrapping_sub(expected) as isize > 0 {
                // Another consumer beat us to it; chase the head.
                pos = self.head.load(Ordering::Relaxed);
                backoff.spin();
            } else {
                // Empty for this lap.
                return None;
            }
        }
    }

    /// Approximate occupancy (racy, diagnostics only).
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    /// Approximate emptiness (racy, diagnostics only).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        // Drain leftover values so their destructors run.
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_pop_basic() {
        let ring: MpmcRing<u32> = MpmcRing::with_capacity(8);
        assert!(ring.try_push(7).is_ok());
        assert_eq!(ring.try_pop(), Some(7));
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let ring: MpmcRing<u8> = MpmcRing::with_capacity(10);
        assert_eq!(ring.capacity(), 16);
    }

    #[test]
    fn test_full_ring_rejects() {
        let ring: MpmcRing<usize> = MpmcRing::with_capacity(4);
        for i in 0..4 {
            assert!(ring.try_push(i).is_ok(), "push {} should fit", i);
        }
        assert_eq!(ring.try_push(99), Err(99));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_fifo_within_ring() {
        let ring: MpmcRing<usize> = MpmcRing::with_capacity(8);
        for i in 0..5 {
            ring.try_push(i).expect("ring has room");
        }
        for i in 0..5 {
            assert_eq!(ring.try_pop(), Some(i));
        }
    }

    #[test]
    fn test_wraparound() {
        let ring: MpmcRing<usize> = MpmcRing::with_capacity(4);
        for lap in 0..10 {
            for i in 0..4 {
                ring.try_push(lap * 4 + i).expect("ring has room");
            }
            for i in 0..4 {
                assert_eq!(ring.try_pop(), Some(lap * 4 + i));
            }
        }
    }

    #[test]
    fn test_drop_drains_leftovers() {
        let ring: MpmcRing<Vec<u8>> = MpmcRing::with_capacity(4);
        ring.try_push(vec![1, 2, 3]).expect("ring has room");
        ring.try_push(vec![4, 5, 6]).expect("ring has room");
        drop(ring); // Drop must not leak the two vectors.
    }

    #[test]
    fn test_mpmc_sum_preserved() {
        const PRODUCERS: usize = 3;
        const CONSUMERS: usize = 3;
        const PER_PRODUCER: usize = 10_000;

        let ring: Arc<MpmcRing<u64>> = Arc::new(MpmcRing::with_capacity(256));
        let consumed = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(std::sync::atomic::AtomicU64::new(0));

        std::thread::scope(|s| {
            for p in 0..PRODUCERS {
                let ring = Arc::clone(&ring);
                s.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let value = (p * PER_PRODUCER + i) as u64;
                        let mut item = value;
                        loop {
                            match ring.try_push(item) {
                                Ok(()) => break,
                                Err(back) => {
                                    item = back;
                                    std::hint::spin_loop();
                                }
                            }
                        }
                    }
                });
            }

            for _ in 0..CONSUMERS {
                let ring = Arc::clone(&ring);
                let consumed = Arc::clone(&consumed);
                let sum = Arc::clone(&sum);
                s.spawn(move || loop {
                    if consumed.load(Ordering::Relaxed) >= PRODUCERS * PER_PRODUCER {
                        break;
                    }
                    match ring.try_pop() {
                        Some(v) => {
                            sum.fetch_add(v, Ordering::Relaxed);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        None => std::hint::spin_loop(),
                    }
                });
            }
        });

        let n = (PRODUCERS * PER_PRODUCER) as u64;
        assert_eq!(consumed.load(Ordering::Relaxed) as u64, n);
        assert_eq!(sum.load(Ordering::Relaxed), n * (n - 1) / 2);
    }
}
