//! Price-level storage - bulk container of [`LevelFifo`]s.
//!
//! Two variants behind one trait: a dense array over a fixed tick band
//! (O(1) access, linear next-best scan) and a sorted map for unbounded
//! sparse ranges (O(log n) access, range-query next-best). The order
//! book is generic over the trait and monomorphizes, so the variant
//! choice costs nothing on the match path.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::arena::{NodeIndex, SlabArena, NULL_INDEX};
use crate::price_level::LevelFifo;
use crate::types::{PriceBand, Tick, EMPTY_ASK, EMPTY_BID};

/// Bound on the dense store's linear walk for a new best after a level
/// depletes. Past the cap the side is declared empty rather than risk a
/// pathological scan over a deep, thin book.
pub const BEST_SCAN_CAP: i64 = 10_000;

pub trait LevelStore {
    /// Level at `px`, which must satisfy `is_valid_price`. Creates the
    /// level on demand where the representation is sparse.
    fn level_mut(&mut self, px: Tick) -> &mut LevelFifo;

    /// Read-only level access; `None` when absent.
    fn level(&self, px: Tick) -> Option<&LevelFifo>;

    /// True when a non-empty level exists at `px`.
    fn has_level(&self, px: Tick) -> bool;

    /// True when `px` is storable here (band membership for the dense
    /// variant, any non-sentinel tick for the sparse one).
    fn is_valid_price(&self, px: Tick) -> bool;

    fn best_bid(&self) -> Tick;
    fn best_ask(&self) -> Tick;
    fn set_best_bid(&mut self, px: Tick);
    fn set_best_ask(&mut self, px: Tick);

    /// Greatest non-empty tick strictly below `px`, or [`EMPTY_BID`].
    fn next_best_bid(&self, px: Tick) -> Tick;

    /// Least non-empty tick strictly above `px`, or [`EMPTY_ASK`].
    fn next_best_ask(&self, px: Tick) -> Tick;

    /// Visit every resting order, lowest tick first. Not for the hot path.
    fn for_each_order(&self, arena: &SlabArena, f: &mut dyn FnMut(Tick, NodeIndex));

    /// Visit every non-empty level, lowest tick first. Not for the hot path.
    fn for_each_nonempty(&self, f: &mut dyn FnMut(Tick, &LevelFifo));
}

/// Dense store over an inclusive tick band, one FIFO per tick.
pub struct ArrayLevels {
    band: PriceBand,
    levels: Vec<LevelFifo>,
    best_bid: Tick,
    best_ask: Tick,
}

impl ArrayLevels {
    pub fn new(band: PriceBand) -> Self {
        Self {
            band,
            levels: vec![LevelFifo::new(); band.width()],
            best_bid: EMPTY_BID,
            best_ask: EMPTY_ASK,
        }
    }

    pub fn band(&self) -> PriceBand {
        self.band
    }

    #[inline]
    fn idx(&self, px: Tick) -> usize {
        debug_assert!(self.band.contains(px), "tick outside band");
        (px - self.band.min_tick) as usize
    }
}

impl LevelStore for ArrayLevels {
    #[inline]
    fn level_mut(&mut self, px: Tick) -> &mut LevelFifo {
        let i = self.idx(px);
        &mut self.levels[i]
    }

    #[inline]
    fn level(&self, px: Tick) -> Option<&LevelFifo> {
        if self.band.contains(px) {
            Some(&self.levels[(px - self.band.min_tick) as usize])
        } else {
            None
        }
    }

    #[inline]
    fn has_level(&self, px: Tick) -> bool {
        self.band.contains(px) && !self.levels[(px - self.band.min_tick) as usize].is_empty()
    }

    #[inline]
    fn is_valid_price(&self, px: Tick) -> bool {
        self.band.contains(px)
    }

    #[inline]
    fn best_bid(&self) -> Tick {
        self.best_bid
    }

    #[inline]
    fn best_ask(&self) -> Tick {
        self.best_ask
    }

    #[inline]
    fn set_best_bid(&mut self, px: Tick) {
        self.best_bid = px;
    }

    #[inline]
    fn set_best_ask(&mut self, px: Tick) {
        self.best_ask = px;
    }

    fn next_best_bid(&self, px: Tick) -> Tick {
        if px == EMPTY_BID {
            return EMPTY_BID;
        }
        let floor = self.band.min_tick.max(px.saturating_sub(BEST_SCAN_CAP));
        let mut cur = (px - 1).min(self.band.max_tick);
        while cur >= floor {
            if !self.levels[(cur - self.band.min_tick) as usize].is_empty() {
                return cur;
            }
            cur -= 1;
        }
        EMPTY_BID
    }

    fn next_best_ask(&self, px: Tick) -> Tick {
        if px == EMPTY_ASK {
            return EMPTY_ASK;
        }
        let ceil = self.band.max_tick.min(px.saturating_add(BEST_SCAN_CAP));
        let mut cur = (px + 1).max(self.band.min_tick);
        while cur <= ceil {
            if !self.levels[(cur - self.band.min_tick) as usize].is_empty() {
                return cur;
            }
            cur += 1;
        }
        EMPTY_ASK
    }

    fn for_each_order(&self, arena: &SlabArena, f: &mut dyn FnMut(Tick, NodeIndex)) {
        for (i, level) in self.levels.iter().enumerate() {
            let px = self.band.min_tick + i as Tick;
            let mut cur = level.head;
            while cur != NULL_INDEX {
                f(px, cur);
                cur = arena.get(cur).next;
            }
        }
    }

    fn for_each_nonempty(&self, f: &mut dyn FnMut(Tick, &LevelFifo)) {
        for (i, level) in self.levels.iter().enumerate() {
            if !level.is_empty() {
                f(self.band.min_tick + i as Tick, level);
            }
        }
    }
}

/// Sparse store: sorted tick → FIFO map. Empty levels linger as
/// zero-cost tombstones; [`TreeLevels::cleanup_empty_levels`] reclaims
/// them off the hot path.
pub struct TreeLevels {
    levels: BTreeMap<Tick, LevelFifo>,
    best_bid: Tick,
    best_ask: Tick,
}

impl TreeLevels {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
            best_bid: EMPTY_BID,
            best_ask: EMPTY_ASK,
        }
    }

    /// Drop levels whose FIFOs have drained.
    pub fn cleanup_empty_levels(&mut self) {
        self.levels.retain(|_, level| !level.is_empty());
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

impl Default for TreeLevels {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelStore for TreeLevels {
    #[inline]
    fn level_mut(&mut self, px: Tick) -> &mut LevelFifo {
        self.levels.entry(px).or_default()
    }

    #[inline]
    fn level(&self, px: Tick) -> Option<&LevelFifo> {
        self.levels.get(&px)
    }

    #[inline]
    fn has_level(&self, px: Tick) -> bool {
        self.levels.get(&px).is_some_and(|l| !l.is_empty())
    }

    #[inline]
    fn is_valid_price(&self, px: Tick) -> bool {
        px > EMPTY_BID && px < EMPTY_ASK
    }

    #[inline]
    fn best_bid(&self) -> Tick {
        self.best_bid
    }

    #[inline]
    fn best_ask(&self) -> Tick {
        self.best_ask
    }

    #[inline]
    fn set_best_bid(&mut self, px: Tick) {
        self.best_bid = px;
    }

    #[inline]
    fn set_best_ask(&mut self, px: Tick) {
        self.best_ask = px;
    }

    fn next_best_bid(&self, px: Tick) -> Tick {
        if px == EMPTY_BID {
            return EMPTY_BID;
        }
        self.levels
            .range(..px)
            .rev()
            .find(|(_, l)| !l.is_empty())
            .map_or(EMPTY_BID, |(&tick, _)| tick)
    }

    fn next_best_ask(&self, px: Tick) -> Tick {
        if px == EMPTY_ASK {
            return EMPTY_ASK;
        }
        self.levels
            .range((Excluded(px), Unbounded))
            .find(|(_, l)| !l.is_empty())
            .map_or(EMPTY_ASK, |(&tick, _)| tick)
    }

    fn for_each_order(&self, arena: &SlabArena, f: &mut dyn FnMut(Tick, NodeIndex)) {
        for (&px, level) in &self.levels {
            let mut cur = level.head;
            while cur != NULL_INDEX {
                f(px, cur);
                cur = arena.get(cur).next;
            }
        }
    }

    fn for_each_nonempty(&self, f: &mut dyn FnMut(Tick, &LevelFifo)) {
        for (&px, level) in &self.levels {
            if !level.is_empty() {
                f(px, level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue_at<S: LevelStore>(store: &mut S, arena: &mut SlabArena, px: Tick, qty: i64) {
        let idx = arena.alloc();
        arena.get_mut(idx).qty = qty;
        let level = store.level_mut(px);
        level.enqueue(arena, idx);
    }

    #[test]
    fn array_band_validity() {
        let store = ArrayLevels::new(PriceBand::new(100, 200));
        assert!(store.is_valid_price(100));
        assert!(store.is_valid_price(200));
        assert!(!store.is_valid_price(99));
        assert!(!store.is_valid_price(201));
        assert!(!store.is_valid_price(EMPTY_BID));
        assert!(!store.is_valid_price(EMPTY_ASK));
    }

    #[test]
    fn array_next_best_scans() {
        let mut arena = SlabArena::new();
        let mut store = ArrayLevels::new(PriceBand::new(100, 200));
        enqueue_at(&mut store, &mut arena, 150, 10);
        enqueue_at(&mut store, &mut arena, 120, 10);

        assert_eq!(store.next_best_bid(150), 120);
        assert_eq!(store.next_best_bid(120), EMPTY_BID);
        assert_eq!(store.next_best_ask(120), 150);
        assert_eq!(store.next_best_ask(150), EMPTY_ASK);
    }

    #[test]
    fn array_scan_respects_cap() {
        let mut arena = SlabArena::new();
        let band = PriceBand::new(0, 20_000);
        let mut store = ArrayLevels::new(band);
        enqueue_at(&mut store, &mut arena, 15_000, 10);
        enqueue_at(&mut store, &mut arena, 1_000, 10);

        // 1_000 is 14_000 ticks below 15_000, past the cap: declared empty.
        assert_eq!(store.next_best_bid(15_000), EMPTY_BID);
        // Within the cap it is found.
        assert_eq!(store.next_best_bid(10_000), 1_000);
    }

    #[test]
    fn tree_accepts_any_nonsentinel_price() {
        let store = TreeLevels::new();
        assert!(store.is_valid_price(1));
        assert!(store.is_valid_price(-1_000_000));
        assert!(store.is_valid_price(i64::MAX - 1));
        assert!(!store.is_valid_price(EMPTY_BID));
        assert!(!store.is_valid_price(EMPTY_ASK));
    }

    #[test]
    fn tree_next_best_range_queries() {
        let mut arena = SlabArena::new();
        let mut store = TreeLevels::new();
        enqueue_at(&mut store, &mut arena, 1_000_000, 10);
        enqueue_at(&mut store, &mut arena, 5, 10);

        assert_eq!(store.next_best_bid(1_000_000), 5);
        assert_eq!(store.next_best_ask(5), 1_000_000);
        assert_eq!(store.next_best_bid(5), EMPTY_BID);
        assert_eq!(store.next_best_ask(1_000_000), EMPTY_ASK);
    }

    #[test]
    fn tree_next_best_skips_drained_levels() {
        let mut arena = SlabArena::new();
        let mut store = TreeLevels::new();
        enqueue_at(&mut store, &mut arena, 100, 10);
        enqueue_at(&mut store, &mut arena, 90, 10);

        // Drain 90 without removing the map entry.
        let idx = store.level(90).unwrap().head;
        store.level_mut(90).erase(&mut arena, idx);

        assert_eq!(store.next_best_bid(100), EMPTY_BID);
        assert_eq!(store.num_levels(), 2);
        store.cleanup_empty_levels();
        assert_eq!(store.num_levels(), 1);
    }

    #[test]
    fn has_level_means_nonempty() {
        let mut arena = SlabArena::new();
        let mut store = ArrayLevels::new(PriceBand::new(100, 200));
        assert!(!store.has_level(150));
        enqueue_at(&mut store, &mut arena, 150, 10);
        assert!(store.has_level(150));
        let idx = store.level(150).unwrap().head;
        store.level_mut(150).erase(&mut arena, idx);
        assert!(!store.has_level(150));
    }

    #[test]
    fn for_each_order_walks_fifos_in_tick_order() {
        let mut arena = SlabArena::new();
        let mut store = ArrayLevels::new(PriceBand::new(100, 200));
        enqueue_at(&mut store, &mut arena, 150, 7);
        enqueue_at(&mut store, &mut arena, 150, 8);
        enqueue_at(&mut store, &mut arena, 120, 9);

        let mut seen = Vec::new();
        store.for_each_order(&arena, &mut |px, idx| seen.push((px, arena.get(idx).qty)));
        assert_eq!(seen, vec![(120, 9), (150, 7), (150, 8)]);
    }

    #[test]
    fn for_each_nonempty_visits_ascending() {
        let mut arena = SlabArena::new();
        let mut store = TreeLevels::new();
        enqueue_at(&mut store, &mut arena, 150, 1);
        enqueue_at(&mut store, &mut arena, 110, 2);
        enqueue_at(&mut store, &mut arena, 130, 3);

        let mut seen = Vec::new();
        store.for_each_nonempty(&mut |px, _| seen.push(px));
        assert_eq!(seen, vec![110, 130, 150]);
    }
}
