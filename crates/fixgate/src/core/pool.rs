// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free fixed-capacity object pool.
//!
//! Slots are laid out contiguously, cache-line aligned, and recycled
//! through a Treiber stack of slot indices held in a single atomic head.
//! Allocation and release are a CAS each on the uncontended path.
//!
//! # Protocol
//!
//! - `allocate`: CAS-pop the head index, placement-write the payload into
//!   the slot, return a handle.
//! - `release`: drop the payload in place, CAS-push the index back.
//! - Release/acquire pairing on the head publishes payload writes before
//!   the slot can be observed by the next allocator.
//!
//! The head carries a monotonically increasing tag in its high 32 bits;
//! every successful pop or push bumps it, so a stale head value can never
//! win a CAS after the stack was reshuffled underneath the reader (the
//! classic pop/pop/push ABA on untagged Treiber stacks).
//!
//! # Performance
//!
//! - allocate: one CAS + one write on the uncontended path
//! - release: one CAS + one drop
//! - no page faults after `prewarm()`

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::{Backoff, CachePadded};

use crate::error::{Error, Result};

/// Free-list terminator.
const NIL: i64 = -1;

/// Slot is currently owned by a live allocation.
const IN_USE: i64 = -2;

/// Head index value meaning "free list empty".
const NIL_IDX: u32 = u32::MAX;

/// Pack a generation tag and a slot index into one head word.
#[inline]
fn pack_head(tag: u32, idx: u32) -> u64 {
    (u64::from(tag) << 32) | u64::from(idx)
}

#[inline]
fn head_idx(head: u64) -> u32 {
    (head & 0xFFFF_FFFF) as u32
}

#[inline]
fn head_tag(head: u64) -> u32 {
    (head >> 32) as u32
}

/// One pool slot: uninitialized payload storage on its own cache line.
#[repr(align(64))]
struct Slot<T> {
    cell: UnsafeCell<MaybeUninit<T>>,
}

/// Counters for pool observability.
///
/// All counters are relaxed atomics on separate cache lines; they are
/// diagnostics, not a synchronization channel.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Currently live allocations.
    allocated: CachePadded<AtomicU64>,
    /// Lifetime successful allocations.
    total_allocations: CachePadded<AtomicU64>,
    /// Lifetime releases.
    total_deallocations: CachePadded<AtomicU64>,
    /// Allocations refused because the free list was empty or the pool
    /// was shut down.
    allocation_failures: CachePadded<AtomicU64>,
    /// Releases refused: foreign pointer, misaligned pointer, or a slot
    /// that was not live (double free).
    rejected_releases: CachePadded<AtomicU64>,
}

impl PoolStats {
    /// Currently live allocations.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Lifetime successful allocations.
    pub fn total_allocations(&self) -> u64 {
        self.total_allocations.load(Ordering::Relaxed)
    }

    /// Lifetime releases.
    pub fn total_deallocations(&self) -> u64 {
        self.total_deallocations.load(Ordering::Relaxed)
    }

    /// Failed allocation attempts.
    pub fn allocation_failures(&self) -> u64 {
        self.allocation_failures.load(Ordering::Relaxed)
    }

    /// Releases rejected as programmer error.
    pub fn rejected_releases(&self) -> u64 {
        self.rejected_releases.load(Ordering::Relaxed)
    }
}

/// Fixed-capacity, type-parameterized lock-free allocator.
///
/// Returns stable pointers into a contiguous slab. Capacity never grows;
/// exhaustion is reported as `None` and counted. Intended use: construct
/// once at startup (optionally [`prewarm`](Self::prewarm)ed), share via
/// `Arc`, pass explicitly to the components that allocate from it.
pub struct ObjectPool<T> {
    /// Contiguous payload slots.
    slots: Box<[Slot<T>]>,

    /// Free-list links: `next[i]` is the next free index after `i`,
    /// [`NIL`] at the end of the list, [`IN_USE`] while slot `i` is live.
    next: Box<[AtomicI64]>,

    /// Treiber-stack head: generation tag in the high 32 bits, index of
    /// the first free slot (or [`NIL_IDX`]) in the low 32 bits.
    head: CachePadded<AtomicU64>,

    /// Refuses new allocations once set.
    shutdown: AtomicBool,

    /// Name for the registry and log lines.
    name: String,

    stats: PoolStats,
}

// SAFETY: ObjectPool is Send + Sync for Send payloads because:
// - slot payloads are only touched by the thread that won the head CAS
//   (allocate) or the thread holding the sole live handle (release)
// - the head CAS release/acquire pairing publishes payload writes before
//   the index can be re-observed
unsafe impl<T: Send> Send for ObjectPool<T> {}
unsafe impl<T: Send> Sync for ObjectPool<T> {}

impl<T> ObjectPool<T> {
    /// Create a pool with `capacity` slots.
    ///
    /// Returns `Err(Error::InvalidConfig)` when `capacity` is zero.
    pub fn new(capacity: usize, name: impl Into<String>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("pool capacity must be > 0".into()));
        }
        if capacity >= NIL_IDX as usize {
            return Err(Error::InvalidConfig(
                "pool capacity must fit in a 32-bit slot index".into(),
            ));
        }
        let name = name.into();

        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot {
                cell: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        // Free list starts as 0 -> 1 -> ... -> capacity-1 -> NIL.
        let next: Box<[AtomicI64]> = (0..capacity)
            .map(|i| {
                let link = if i + 1 < capacity { (i + 1) as i64 } else { NIL };
                AtomicI64::new(link)
            })
            .collect();

        Ok(Self {
            slots,
            next,
            head: CachePadded::new(AtomicU64::new(pack_head(0, 0))),
            shutdown: AtomicBool::new(false),
            name,
            stats: PoolStats::default(),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Currently free slots (racy, diagnostics only).
    pub fn available(&self) -> usize {
        self.capacity() - self.stats.allocated() as usize
    }

    /// Observability counters.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Touch one byte per slot to force page residency.
    ///
    /// Called at startup so the hot path never takes a first-touch fault.
    pub fn prewarm(&self) {
        for slot in self.slots.iter() {
            // SAFETY: writing one byte into MaybeUninit storage we own is
            // always in-bounds; no live allocation exists during warm-up
            // by contract (callers prewarm before handing the pool out).
            unsafe {
                let base = (*slot.cell.get()).as_mut_ptr().cast::<u8>();
                std::ptr::write_volatile(base, 0);
            }
        }
    }

    /// Allocate a slot and move `value` into it.
    ///
    /// Returns `None` when the free list is empty or the pool is shut
    /// down; both outcomes bump `allocation_failures`.
    pub fn allocate_raw(&self, value: T) -> Option<NonNull<T>> {
        if self.shutdown.load(Ordering::Relaxed) {
            self.stats.allocation_failures.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head_idx(head) == NIL_IDX {
                self.stats.allocation_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let idx = head_idx(head) as usize;
            let next = self.next[idx].load(Ordering::Relaxed);

            // A racing allocator may have claimed `idx` already (next ==
            // IN_USE); the tagged CAS below fails in that case and we retry.
            if next == IN_USE {
                backoff.spin();
                continue;
            }
            let next_idx = if next == NIL { NIL_IDX } else { next as u32 };
            let new_head = pack_head(head_tag(head).wrapping_add(1), next_idx);

            if self
                .head
                .compare_exchange_weak(head, new_head, Ordering::Release, Ordering::Acquire)
                .is_ok()
            {
                self.next[idx].store(IN_USE, Ordering::Relaxed);

                // SAFETY: winning the head CAS grants exclusive ownership
                // of slot `idx`; nothing else can observe it until it is
                // pushed back.
                let ptr = unsafe {
                    let cell = (*self.slots[idx].cell.get()).as_mut_ptr();
                    cell.write(value);
                    NonNull::new_unchecked(cell)
                };

                self.stats.allocated.fetch_add(1, Ordering::Relaxed);
                self.stats.total_allocations.fetch_add(1, Ordering::Relaxed);
                return Some(ptr);
            }
            backoff.spin();
        }
    }

    /// Release a slot previously returned by [`allocate_raw`](Self::allocate_raw).
    ///
    /// Foreign pointers, misaligned pointers, and slots that are not live
    /// are rejected silently with a counter bump; the payload destructor
    /// runs only for accepted releases.
    pub fn deallocate_raw(&self, ptr: NonNull<T>) {
        let idx = match self.index_of(ptr) {
            Some(idx) => idx,
            None => {
                self.stats.rejected_releases.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // Claim the slot back from IN_USE; a second release of the same
        // pointer loses this exchange and is counted, not executed.
        if self.next[idx]
            .compare_exchange(IN_USE, NIL, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            self.stats.rejected_releases.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // SAFETY: the IN_USE -> NIL exchange above guarantees exactly one
        // caller reaches this point per live allocation.
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr());
        }

        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let link = if head_idx(head) == NIL_IDX {
                NIL
            } else {
                i64::from(head_idx(head))
            };
            self.next[idx].store(link, Ordering::Relaxed);

            let new_head = pack_head(head_tag(head).wrapping_add(1), idx as u32);
            if self
                .head
                .compare_exchange_weak(head, new_head, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            backoff.spin();
        }

        self.stats.allocated.fetch_sub(1, Ordering::Relaxed);
        self.stats.total_deallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Map a pointer back to its slot index.
    ///
    /// `None` for pointers outside the slab or not on a slot boundary.
    fn index_of(&self, ptr: NonNull<T>) -> Option<usize> {
        let base = self.slots.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        let slot_size = std::mem::size_of::<Slot<T>>();

        if addr < base {
            return None;
        }
        let offset = addr - base;
        if offset % slot_size != 0 {
            return None;
        }
        let idx = offset / slot_size;
        if idx >= self.slots.len() {
            return None;
        }
        Some(idx)
    }

    /// Refuse all future allocations. Live handles stay valid and can
    /// still be released.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether the pool refuses new allocations.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Rebuild the free list. Fails while any allocation is live.
    pub fn try_reset(&self) -> Result<()> {
        let allocated = self.stats.allocated() as usize;
        if allocated != 0 {
            return Err(Error::PoolBusy { allocated });
        }
        for (i, link) in self.next.iter().enumerate() {
            let next = if i + 1 < self.next.len() {
                (i + 1) as i64
            } else {
                NIL
            };
            link.store(next, Ordering::Relaxed);
        }
        let tag = head_tag(self.head.load(Ordering::Relaxed));
        self.head
            .store(pack_head(tag.wrapping_add(1), 0), Ordering::Release);
        self.shutdown.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Allocate into a move-only RAII handle.
    ///
    /// The handle keeps the pool alive and releases its slot on drop.
    pub fn allocate(self: &Arc<Self>, value: T) -> Option<PoolBox<T>> {
        let ptr = self.allocate_raw(value)?;
        Some(PoolBox {
            pool: Arc::clone(self),
            ptr,
        })
    }

    /// Rebuild a [`PoolBox`] from a raw pointer handed out by
    /// [`PoolBox::into_raw`].
    ///
    /// # Safety
    /// `ptr` must be a live allocation from this pool that has not been
    /// released and is not owned by another handle.
    pub unsafe fn from_raw(self: &Arc<Self>, ptr: NonNull<T>) -> PoolBox<T> {
        PoolBox {
            pool: Arc::clone(self),
            ptr,
        }
    }
}

impl<T> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        // Any slot still IN_USE at teardown leaks its payload rather than
        // double-dropping; live handles outliving the pool are prevented
        // by PoolBox holding an Arc, so this only triggers for leaked raw
        // pointers.
        for (idx, link) in self.next.iter().enumerate() {
            if link.load(Ordering::Relaxed) == IN_USE {
                log::warn!(
                    "pool '{}': slot {} still live at drop, payload leaked",
                    self.name,
                    idx
                );
            }
        }
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("allocated", &self.stats.allocated())
            .field("failures", &self.stats.allocation_failures())
            .finish()
    }
}

/// Move-only owning handle to a pooled allocation.
///
/// Dereferences to the payload; releasing happens on drop. For zero-cost
/// transfer across thread boundaries (queues), [`into_raw`](Self::into_raw)
/// detaches the pointer and [`ObjectPool::from_raw`] reattaches it.
pub struct PoolBox<T> {
    pool: Arc<ObjectPool<T>>,
    ptr: NonNull<T>,
}

// SAFETY: the handle uniquely owns its slot; sending it moves that
// ownership, which is sound whenever the payload itself is Send.
unsafe impl<T: Send> Send for PoolBox<T> {}
unsafe impl<T: Send + Sync> Sync for PoolBox<T> {}

impl<T> PoolBox<T> {
    /// The pool this allocation came from.
    pub fn pool(&self) -> &Arc<ObjectPool<T>> {
        &self.pool
    }

    /// Detach the raw pointer without releasing the slot.
    ///
    /// The caller becomes responsible for pairing it with
    /// [`ObjectPool::from_raw`] or [`ObjectPool::deallocate_raw`].
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl<T> std::ops::Deref for PoolBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the handle owns the slot; the payload was initialized by
        // allocate and stays valid until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> std::ops::DerefMut for PoolBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, plus &mut self guarantees exclusivity.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<T> {
    fn drop(&mut self) {
        self.pool.deallocate_raw(self.ptr);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PoolBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PoolBox").field(&**self).finish()
    }
}
