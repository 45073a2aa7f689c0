//! Slab arena - O(1) node allocation from mmap-backed slabs.
//!
//! Nodes are addressed by `u32` handles ("compressed pointers"): half
//! the metadata of a native pointer, and stable across slab growth. A
//! free list is threaded through the `next` field of unused cells. When
//! the free list runs dry a fresh slab is mapped, so `alloc` never
//! fails; an mmap failure is a configuration error and aborts.

use std::fmt;
use std::ptr;

use crate::types::{OrderId, Qty, Tick, Timestamp, UserId, flags};

/// Sentinel value representing a null/invalid handle (like nullptr)
pub const NULL_INDEX: u32 = u32::MAX;

/// Arena handle type.
pub type NodeIndex = u32;

/// Orders per slab. Power of two so handle decomposition is shift/mask.
const NODES_PER_SLAB: usize = 1 << 14;
const SLAB_SHIFT: u32 = 14;
const SLAB_MASK: u32 = (NODES_PER_SLAB as u32) - 1;

/// One order resting (or transiently being matched) at a single price.
///
/// Intrusive: `prev`/`next` link the node into exactly one level FIFO
/// while it rests. The iceberg, expiry and stop fields are schema
/// carriers; the match loop does not drive them.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OrderNode {
    pub id: OrderId,
    pub qty: Qty,
    pub ts: Timestamp,
    pub display_qty: Qty,
    pub hidden_qty: Qty,
    pub expiry_ts: Timestamp,
    pub stop_price: Tick,
    pub user: UserId,
    pub flags: u32,
    pub prev: NodeIndex,
    pub next: NodeIndex,
}

// 8 * 7 + 4 * 4 = 72 bytes, no padding at natural alignment.
const _: () = assert!(std::mem::size_of::<OrderNode>() == 72);

impl OrderNode {
    pub fn is_iceberg(&self) -> bool {
        self.flags & flags::ICEBERG != 0
    }

    /// Refill the visible quantity from the hidden reserve. Returns the
    /// replenished amount (zero when nothing is hidden or displayable).
    pub fn replenish(&mut self) -> Qty {
        if self.hidden_qty > 0 && self.display_qty > 0 {
            let r = self.hidden_qty.min(self.display_qty);
            self.qty = r;
            self.hidden_qty -= r;
            r
        } else {
            0
        }
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("qty", &self.qty)
            .field("ts", &self.ts)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

struct Slab {
    base: *mut OrderNode,
    bytes: usize,
}

impl Drop for Slab {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.cast(), self.bytes);
        }
    }
}

/// Grow-only slab pool of [`OrderNode`]s with an intrusive free list.
pub struct SlabArena {
    slabs: Vec<Slab>,
    free_head: NodeIndex,
    in_use: u32,
}

// The arena is owned by exactly one matching thread; the raw slab
// pointers are never shared.
unsafe impl Send for SlabArena {}

impl SlabArena {
    /// Arena with one slab mapped up front.
    pub fn new() -> Self {
        Self::with_slabs(1)
    }

    pub fn with_slabs(initial: usize) -> Self {
        let mut arena = Self {
            slabs: Vec::new(),
            free_head: NULL_INDEX,
            in_use: 0,
        };
        for _ in 0..initial.max(1) {
            arena.add_slab();
        }
        arena
    }

    fn add_slab(&mut self) {
        assert!(
            self.slabs.len() < (NULL_INDEX >> SLAB_SHIFT) as usize,
            "arena handle space exhausted"
        );
        let bytes = NODES_PER_SLAB * std::mem::size_of::<OrderNode>();
        let base = map_anonymous(bytes);
        let slab_no = self.slabs.len() as u32;
        self.slabs.push(Slab { base, bytes });

        // Thread the fresh cells onto the free list, lowest handle first.
        let first = slab_no << SLAB_SHIFT;
        for off in (0..NODES_PER_SLAB as u32).rev() {
            let idx = first | off;
            unsafe {
                (*base.add(off as usize)).next = self.free_head;
            }
            self.free_head = idx;
        }
    }

    /// Pop a node off the free list, mapping a new slab if exhausted.
    /// Link fields come back as `NULL_INDEX`; everything else is stale.
    #[inline]
    pub fn alloc(&mut self) -> NodeIndex {
        if self.free_head == NULL_INDEX {
            self.add_slab();
        }
        let idx = self.free_head;
        self.free_head = self.get(idx).next;
        let node = self.get_mut(idx);
        node.next = NULL_INDEX;
        node.prev = NULL_INDEX;
        self.in_use += 1;
        idx
    }

    /// Return a node to the free list.
    ///
    /// The handle must have come from this arena's `alloc` and must not
    /// have been freed already.
    #[inline]
    pub fn free(&mut self, idx: NodeIndex) {
        debug_assert!(self.in_use > 0, "free on empty arena");
        let head = self.free_head;
        let node = self.get_mut(idx);
        node.next = head;
        node.prev = NULL_INDEX;
        self.free_head = idx;
        self.in_use -= 1;
    }

    #[inline]
    pub fn get(&self, idx: NodeIndex) -> &OrderNode {
        let (slab, off) = Self::split(idx);
        debug_assert!(slab < self.slabs.len(), "handle out of bounds");
        unsafe { &*self.slabs[slab].base.add(off) }
    }

    #[inline]
    pub fn get_mut(&mut self, idx: NodeIndex) -> &mut OrderNode {
        let (slab, off) = Self::split(idx);
        debug_assert!(slab < self.slabs.len(), "handle out of bounds");
        unsafe { &mut *self.slabs[slab].base.add(off) }
    }

    #[inline]
    fn split(idx: NodeIndex) -> (usize, usize) {
        ((idx >> SLAB_SHIFT) as usize, (idx & SLAB_MASK) as usize)
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use as usize
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slabs.len() * NODES_PER_SLAB
    }

    #[inline]
    pub fn num_slabs(&self) -> usize {
        self.slabs.len()
    }

    /// Touch every mapped page so the hot path never takes a soft fault.
    pub fn warm_up(&mut self) {
        for slab in &self.slabs {
            let mut p = slab.base.cast::<u8>();
            let end = unsafe { p.add(slab.bytes) };
            while p < end {
                unsafe {
                    ptr::write_volatile(p, ptr::read_volatile(p));
                    p = p.add(4096);
                }
            }
        }
    }
}

impl Default for SlabArena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SlabArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabArena")
            .field("slabs", &self.slabs.len())
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use)
            .finish()
    }
}

/// Map one slab of anonymous zeroed memory. On Linux, ask for huge-page
/// backing first and fall back to regular pages advised toward
/// transparent huge-page promotion.
fn map_anonymous(bytes: usize) -> *mut OrderNode {
    unsafe {
        #[cfg(target_os = "linux")]
        {
            let p = libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                -1,
                0,
            );
            if p != libc::MAP_FAILED {
                return p.cast();
            }
        }
        let p = libc::mmap(
            ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if p == libc::MAP_FAILED {
            eprintln!("lobcore: anonymous mmap of {bytes} bytes failed");
            std::process::abort();
        }
        #[cfg(target_os = "linux")]
        libc::madvise(p, bytes, libc::MADV_HUGEPAGE);
        p.cast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_is_72_bytes() {
        assert_eq!(std::mem::size_of::<OrderNode>(), 72);
    }

    #[test]
    fn alloc_free_reuses_cells() {
        let mut arena = SlabArena::new();
        let a = arena.alloc();
        let b = arena.alloc();
        assert_ne!(a, b);
        assert_eq!(arena.in_use(), 2);

        arena.free(b);
        let c = arena.alloc();
        assert_eq!(c, b, "freed cell should be reused first");
        assert_eq!(arena.in_use(), 2);
    }

    #[test]
    fn handles_ascend_within_a_fresh_slab() {
        let mut arena = SlabArena::new();
        assert_eq!(arena.alloc(), 0);
        assert_eq!(arena.alloc(), 1);
        assert_eq!(arena.alloc(), 2);
    }

    #[test]
    fn grows_past_one_slab() {
        let mut arena = SlabArena::new();
        let start_cap = arena.capacity();
        let mut handles = Vec::with_capacity(start_cap + 1);
        for _ in 0..=start_cap {
            handles.push(arena.alloc());
        }
        assert_eq!(arena.num_slabs(), 2);
        assert_eq!(arena.in_use(), start_cap + 1);

        // Every handle distinct and resolvable.
        let last = *handles.last().unwrap();
        arena.get_mut(last).id = 77;
        assert_eq!(arena.get(last).id, 77);

        for h in handles {
            arena.free(h);
        }
        assert_eq!(arena.in_use(), 0);
    }

    #[test]
    fn fields_survive_round_trip() {
        let mut arena = SlabArena::new();
        let idx = arena.alloc();
        {
            let node = arena.get_mut(idx);
            node.id = 12345;
            node.user = 999;
            node.qty = 100;
            node.ts = 42;
            node.flags = flags::STP;
        }
        let node = arena.get(idx);
        assert_eq!(node.id, 12345);
        assert_eq!(node.user, 999);
        assert_eq!(node.qty, 100);
        assert_eq!(node.ts, 42);
        assert_eq!(node.prev, NULL_INDEX);
        assert_eq!(node.next, NULL_INDEX);
    }

    #[test]
    fn iceberg_replenish() {
        let mut node = OrderNode {
            id: 1,
            qty: 0,
            ts: 0,
            display_qty: 10,
            hidden_qty: 25,
            expiry_ts: 0,
            stop_price: 0,
            user: 1,
            flags: flags::ICEBERG,
            prev: NULL_INDEX,
            next: NULL_INDEX,
        };
        assert!(node.is_iceberg());
        assert_eq!(node.replenish(), 10);
        assert_eq!(node.qty, 10);
        assert_eq!(node.hidden_qty, 15);
        assert_eq!(node.replenish(), 10);
        assert_eq!(node.hidden_qty, 5);
        assert_eq!(node.replenish(), 5);
        assert_eq!(node.hidden_qty, 0);
        assert_eq!(node.replenish(), 0);
    }

    #[test]
    fn warm_up_touches_all_slabs() {
        let mut arena = SlabArena::with_slabs(2);
        arena.warm_up();
        assert_eq!(arena.num_slabs(), 2);
    }
}
