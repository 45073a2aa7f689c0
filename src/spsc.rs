//! Bounded lock-free single-producer/single-consumer ring queue.
//!
//! Size rounds up to a power of two N; usable capacity is N - 1 (one
//! slot distinguishes full from empty). Head and tail live on separate
//! cache lines; the producer publishes with release and the consumer
//! observes with acquire. Exactly one thread may push and exactly one
//! may pop - the type is shared behind `Arc`, the discipline is the
//! contract.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(align(64))]
struct CachePadded<T>(T);

pub struct SpscQueue<T> {
    buf: Vec<UnsafeCell<MaybeUninit<T>>>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T: Copy> SpscQueue<T> {
    /// Queue holding up to `next_power_of_two(capacity).max(2) - 1`
    /// elements.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two().max(2);
        let mut buf = Vec::with_capacity(cap);
        for _ in 0..cap {
            buf.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Self {
            buf,
            mask: cap - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
        }
    }

    /// Producer side. False when the ring is full.
    #[inline]
    pub fn push(&self, value: T) -> bool {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let next = tail.wrapping_add(1);
        if next & self.mask == self.head.0.load(Ordering::Acquire) & self.mask {
            return false;
        }
        unsafe {
            (*self.buf[tail & self.mask].get()).write(value);
        }
        self.tail.0.store(next, Ordering::Release);
        true
    }

    /// Consumer side. `None` when the ring is empty.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        if head == self.tail.0.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*self.buf[head & self.mask].get()).assume_init_read() };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.0.load(Ordering::Relaxed) == self.tail.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tail
            .0
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.0.load(Ordering::Acquire))
    }

    /// Usable capacity (one slot below the ring size).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask
    }
}

/// Architecture-appropriate busy-wait hint.
#[inline]
pub fn pause() {
    std::hint::spin_loop();
}

/// Pause-spin up to a limit, then hand the core to the scheduler.
/// Producers and consumers blocked on a ring use one of these per wait
/// site.
pub struct Backoff {
    spins: u32,
    limit: u32,
}

impl Backoff {
    pub fn new(limit: u32) -> Self {
        Self {
            spins: 0,
            limit: limit.max(1),
        }
    }

    #[inline]
    pub fn snooze(&mut self) {
        self.spins += 1;
        if self.spins >= self.limit {
            std::thread::yield_now();
            self.spins = 0;
        } else {
            pause();
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
    }
}
