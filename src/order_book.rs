//! Order book - submit/cancel/modify over two price-level stores.
//!
//! Owns the slab arena, the id index and both sides' level storage;
//! everything else reaches the book through [`OrderCommand`]s and leaves
//! through an [`EventSink`]. Single-writer: one matching thread owns the
//! book exclusively, so there is no interior synchronization anywhere.
//!
//! The match loop is monomorphized over the maker side (the C++-style
//! "templated on IsBid" trick via const generics) so the per-side price
//! comparisons compile to straight-line code.

use crate::arena::{SlabArena, NodeIndex, NULL_INDEX};
use crate::command::{BookUpdate, ExecResult, OrderCommand, TradeEvent, kind};
use crate::id_index::FlatMap;
use crate::levels::{ArrayLevels, LevelStore, TreeLevels};
use crate::timestamp;
use crate::types::{
    flags, OrderId, OrderType, PriceBand, Qty, Side, SymbolId, Tick, TimeInForce, Timestamp,
    UserId, EMPTY_ASK, EMPTY_BID,
};

/// Bound on the FOK pre-check walk across price levels.
const FOK_SCAN_CAP: u32 = 10_000;

/// Receiver for the book's two output streams. Invoked synchronously on
/// the calling thread, in emission order.
pub trait EventSink {
    fn on_trade(&mut self, ev: TradeEvent);
    fn on_book_update(&mut self, ev: BookUpdate);
}

/// Sink that appends to vectors. Tests and offline tools.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub trades: Vec<TradeEvent>,
    pub updates: Vec<BookUpdate>,
}

impl EventSink for RecordingSink {
    fn on_trade(&mut self, ev: TradeEvent) {
        self.trades.push(ev);
    }
    fn on_book_update(&mut self, ev: BookUpdate) {
        self.updates.push(ev);
    }
}

/// Sink that drops everything. Benchmarks.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_trade(&mut self, _ev: TradeEvent) {}
    fn on_book_update(&mut self, _ev: BookUpdate) {}
}

/// Where a resting order lives: side, price, arena handle.
#[derive(Clone, Copy, Debug)]
pub struct OrderRef {
    pub side: Side,
    pub price: Tick,
    pub node: NodeIndex,
}

impl Default for OrderRef {
    fn default() -> Self {
        Self {
            side: Side::Bid,
            price: 0,
            node: NULL_INDEX,
        }
    }
}

/// Price-time-priority limit order book for one symbol.
pub struct OrderBook<L: LevelStore> {
    symbol_id: SymbolId,
    bids: L,
    asks: L,
    arena: SlabArena,
    ids: FlatMap<OrderRef>,
}

impl OrderBook<ArrayLevels> {
    /// Book over a dense tick band (the pipeline default).
    pub fn banded(symbol_id: SymbolId, band: PriceBand) -> Self {
        Self::new(symbol_id, ArrayLevels::new(band), ArrayLevels::new(band))
    }
}

impl OrderBook<TreeLevels> {
    /// Book over sorted-map levels, for unbounded/sparse tick ranges.
    pub fn sparse(symbol_id: SymbolId) -> Self {
        Self::new(symbol_id, TreeLevels::new(), TreeLevels::new())
    }
}

impl<L: LevelStore> OrderBook<L> {
    pub fn new(symbol_id: SymbolId, bids: L, asks: L) -> Self {
        Self {
            symbol_id,
            bids,
            asks,
            arena: SlabArena::with_slabs(2),
            ids: FlatMap::with_capacity(8192),
        }
    }

    #[inline]
    pub fn symbol(&self) -> SymbolId {
        self.symbol_id
    }

    #[inline]
    pub fn best_bid(&self) -> Tick {
        self.bids.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Tick {
        self.asks.best_ask()
    }

    #[inline]
    pub fn is_empty(&self, side: Side) -> bool {
        match side {
            Side::Bid => self.bids.best_bid() == EMPTY_BID,
            Side::Ask => self.asks.best_ask() == EMPTY_ASK,
        }
    }

    /// Number of resting orders.
    #[inline]
    pub fn order_count(&self) -> usize {
        self.ids.len()
    }

    /// True if `id` is resting on the book.
    #[inline]
    pub fn contains_order(&self, id: OrderId) -> bool {
        self.ids.contains(id)
    }

    /// (total quantity, order count) at one price.
    pub fn depth_at(&self, side: Side, px: Tick) -> (Qty, u32) {
        let store = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        store.level(px).map_or((0, 0), |l| (l.total_qty, l.count))
    }

    /// Pre-fault arena pages before entering the hot loop.
    pub fn warm_up(&mut self) {
        self.arena.warm_up();
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Submit a limit order (GTC/IOC/FOK/GTD, flags per [`flags`]).
    pub fn submit_limit<S: EventSink>(&mut self, cmd: &OrderCommand, sink: &mut S) -> ExecResult {
        let (Some(side), Some(tif)) = (cmd.side(), cmd.tif()) else {
            self.emit_book_update(sink);
            return ExecResult::REJECTED;
        };
        let qty: Qty = cmd.qty;
        let px: Tick = cmd.price_ticks;

        let price_ok = match side {
            Side::Bid => self.bids.is_valid_price(px),
            Side::Ask => self.asks.is_valid_price(px),
        };
        if qty <= 0 || !price_ok || self.ids.contains(cmd.order_id) {
            self.emit_book_update(sink);
            return ExecResult::REJECTED;
        }

        // Maker-only orders never enter the match loop.
        if cmd.has_flag(flags::POST_ONLY) && self.would_cross(side, px) {
            self.emit_book_update(sink);
            return ExecResult::REJECTED;
        }

        // FOK: prove the liquidity exists before touching the book. The
        // walk does not model STP skips; see the remainder handling below.
        if tif == TimeInForce::Fok {
            let can_fill = match side {
                Side::Bid => self.fok_can_fill::<false>(qty, px),
                Side::Ask => self.fok_can_fill::<true>(qty, px),
            };
            if !can_fill {
                self.emit_book_update(sink);
                return ExecResult::REJECTED;
            }
        }

        let stp = cmd.has_flag(flags::STP);
        let filled = match side {
            Side::Bid => {
                let best_ask = self.asks.best_ask();
                if best_ask != EMPTY_ASK && best_ask <= px {
                    self.match_against::<false, S>(qty, px, cmd.order_id, cmd.user_id, cmd.recv_ts, stp, sink)
                } else {
                    0
                }
            }
            Side::Ask => {
                let best_bid = self.bids.best_bid();
                if best_bid != EMPTY_BID && best_bid >= px {
                    self.match_against::<true, S>(qty, px, cmd.order_id, cmd.user_id, cmd.recv_ts, stp, sink)
                } else {
                    0
                }
            }
        };

        let mut remaining = qty - filled;
        if remaining > 0 {
            if tif.can_rest() {
                self.rest(side, px, remaining, cmd);
            } else {
                // IOC drops the remainder. A FOK remainder is only
                // reachable through the STP interaction; it is killed,
                // the fills stand, no rollback.
                remaining = 0;
            }
        }

        self.emit_book_update(sink);
        ExecResult::new(filled, remaining)
    }

    /// Submit a market order: infinitely aggressive, never rests.
    /// `remaining` reports the unfillable portion.
    pub fn submit_market<S: EventSink>(&mut self, cmd: &OrderCommand, sink: &mut S) -> ExecResult {
        let Some(side) = cmd.side() else {
            self.emit_book_update(sink);
            return ExecResult::REJECTED;
        };
        let qty: Qty = cmd.qty;
        if qty <= 0 {
            self.emit_book_update(sink);
            return ExecResult::REJECTED;
        }

        let stp = cmd.has_flag(flags::STP);
        let filled = match side {
            Side::Bid => {
                self.match_against::<false, S>(qty, EMPTY_ASK, cmd.order_id, cmd.user_id, cmd.recv_ts, stp, sink)
            }
            Side::Ask => {
                self.match_against::<true, S>(qty, EMPTY_BID, cmd.order_id, cmd.user_id, cmd.recv_ts, stp, sink)
            }
        };

        self.emit_book_update(sink);
        ExecResult::new(filled, qty - filled)
    }

    /// Cancel a resting order. False when the id is unknown.
    pub fn cancel<S: EventSink>(&mut self, id: OrderId, sink: &mut S) -> bool {
        if self.remove_resting(id).is_none() {
            return false;
        }
        self.emit_book_update(sink);
        true
    }

    /// Modify a resting order.
    ///
    /// Same price and a smaller quantity downsizes in place (priority
    /// kept). Any other change is cancel-and-replace under the same id,
    /// restamped with the modify's receive time so the replacement goes
    /// to the back of the queue (priority lost); it may cross
    /// immediately and the result reflects that.
    pub fn modify<S: EventSink>(
        &mut self,
        id: OrderId,
        new_price: Tick,
        new_qty: Qty,
        recv_ts: Timestamp,
        sink: &mut S,
    ) -> ExecResult {
        let Some(&entry) = self.ids.find(id) else {
            return ExecResult::REJECTED;
        };
        if new_qty <= 0 {
            return ExecResult::REJECTED;
        }

        let node = self.arena.get(entry.node);
        let cur_qty = node.qty;
        let user = node.user;
        let node_flags = node.flags;

        if new_price == entry.price && new_qty < cur_qty {
            let diff = cur_qty - new_qty;
            let store = match entry.side {
                Side::Bid => &mut self.bids,
                Side::Ask => &mut self.asks,
            };
            store
                .level_mut(entry.price)
                .reduce_qty(&mut self.arena, entry.node, diff);
            self.emit_book_update(sink);
            return ExecResult::new(0, new_qty);
        }

        // Cancel-and-replace: the book update for this operation comes
        // from the replacement submit.
        self.remove_resting(id);
        let replacement = OrderCommand {
            kind: kind::NEW_ORDER,
            recv_ts,
            order_id: id,
            symbol_id: self.symbol_id,
            user_id: user,
            price_ticks: new_price,
            qty: new_qty,
            side: entry.side as u8,
            order_type: OrderType::Limit as u8,
            tif: TimeInForce::Gtc as u8,
            flags: node_flags,
            stop_price: 0,
            display_qty: 0,
            expiry_ts: 0,
        };
        self.submit_limit(&replacement, sink)
    }

    // ------------------------------------------------------------------
    // Matching internals
    // ------------------------------------------------------------------

    /// Cross the maker side while its best price satisfies the taker's
    /// limit. Returns the filled quantity. `MAKER_IS_BID` selects the
    /// side being consumed.
    fn match_against<const MAKER_IS_BID: bool, S: EventSink>(
        &mut self,
        mut qty: Qty,
        px_limit: Tick,
        taker_id: OrderId,
        taker_user: UserId,
        ts: Timestamp,
        stp: bool,
        sink: &mut S,
    ) -> Qty {
        let symbol_id = self.symbol_id;
        let mut total_filled: Qty = 0;

        while qty > 0 {
            let store = if MAKER_IS_BID { &mut self.bids } else { &mut self.asks };
            let best_px = if MAKER_IS_BID { store.best_bid() } else { store.best_ask() };
            if MAKER_IS_BID {
                if best_px == EMPTY_BID || best_px < px_limit {
                    break;
                }
            } else if best_px == EMPTY_ASK || best_px > px_limit {
                break;
            }

            let arena = &mut self.arena;
            let ids = &mut self.ids;
            let level = store.level_mut(best_px);

            let mut cur = level.peek_head();
            while cur != NULL_INDEX && qty > 0 {
                let maker = arena.get(cur);
                let maker_id = maker.id;
                let maker_user = maker.user;
                let maker_qty = maker.qty;
                let next = maker.next;

                // Self-trade prevention: skip, leave the maker untouched.
                if stp && maker_user == taker_user {
                    cur = next;
                    continue;
                }

                let match_qty = qty.min(maker_qty);
                sink.on_trade(TradeEvent {
                    ts,
                    taker_id,
                    maker_id,
                    symbol_id,
                    price_ticks: best_px,
                    qty: match_qty,
                });

                qty -= match_qty;
                total_filled += match_qty;

                if match_qty == maker_qty {
                    level.erase(arena, cur);
                    ids.erase(maker_id);
                    arena.free(cur);
                } else {
                    level.reduce_qty(arena, cur, match_qty);
                }
                cur = next;
            }

            if level.is_empty() {
                let next_best = if MAKER_IS_BID {
                    store.next_best_bid(best_px)
                } else {
                    store.next_best_ask(best_px)
                };
                if MAKER_IS_BID {
                    store.set_best_bid(next_best);
                } else {
                    store.set_best_ask(next_best);
                }
            } else {
                // Liquidity remains at the best (or only STP-skipped
                // makers): nothing further to match.
                break;
            }
        }

        total_filled
    }

    /// Walk the maker side from best outward, accumulating level sums,
    /// until the taker's quantity is covered or the limit price stops
    /// qualifying. Bounded at [`FOK_SCAN_CAP`] levels.
    fn fok_can_fill<const MAKER_IS_BID: bool>(&self, qty: Qty, px_limit: Tick) -> bool {
        let store = if MAKER_IS_BID { &self.bids } else { &self.asks };
        let mut px = if MAKER_IS_BID { store.best_bid() } else { store.best_ask() };
        let mut available: Qty = 0;

        for _ in 0..FOK_SCAN_CAP {
            if MAKER_IS_BID {
                if px == EMPTY_BID || px < px_limit {
                    break;
                }
            } else if px == EMPTY_ASK || px > px_limit {
                break;
            }
            if let Some(level) = store.level(px) {
                available += level.total_qty;
            }
            if available >= qty {
                return true;
            }
            px = if MAKER_IS_BID {
                store.next_best_bid(px)
            } else {
                store.next_best_ask(px)
            };
        }

        available >= qty
    }

    #[inline]
    fn would_cross(&self, side: Side, px: Tick) -> bool {
        match side {
            Side::Bid => {
                let best_ask = self.asks.best_ask();
                best_ask != EMPTY_ASK && best_ask <= px
            }
            Side::Ask => {
                let best_bid = self.bids.best_bid();
                best_bid != EMPTY_BID && best_bid >= px
            }
        }
    }

    /// Put a remainder on the book: allocate, enqueue, index, maybe
    /// improve the best.
    fn rest(&mut self, side: Side, px: Tick, remaining: Qty, cmd: &OrderCommand) {
        let idx = self.arena.alloc();
        let node = self.arena.get_mut(idx);
        node.id = cmd.order_id;
        node.user = cmd.user_id;
        node.qty = remaining;
        node.ts = cmd.recv_ts;
        node.flags = cmd.flags;
        node.display_qty = cmd.display_qty;
        node.hidden_qty = 0;
        node.expiry_ts = cmd.expiry_ts;
        node.stop_price = cmd.stop_price;

        let store = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        store.level_mut(px).enqueue(&mut self.arena, idx);

        match side {
            Side::Bid => {
                if store.best_bid() == EMPTY_BID || px > store.best_bid() {
                    store.set_best_bid(px);
                }
            }
            Side::Ask => {
                if store.best_ask() == EMPTY_ASK || px < store.best_ask() {
                    store.set_best_ask(px);
                }
            }
        }

        self.ids.insert(
            cmd.order_id,
            OrderRef {
                side,
                price: px,
                node: idx,
            },
        );
    }

    /// Unlink, unindex and free a resting order; refresh the side's
    /// best if its level drained. No event emission.
    fn remove_resting(&mut self, id: OrderId) -> Option<OrderRef> {
        let &entry = self.ids.find(id)?;

        let store = match entry.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let level = store.level_mut(entry.price);
        level.erase(&mut self.arena, entry.node);
        let drained = level.is_empty();

        if drained {
            match entry.side {
                Side::Bid => {
                    if store.best_bid() == entry.price {
                        let nb = store.next_best_bid(entry.price);
                        store.set_best_bid(nb);
                    }
                }
                Side::Ask => {
                    if store.best_ask() == entry.price {
                        let na = store.next_best_ask(entry.price);
                        store.set_best_ask(na);
                    }
                }
            }
        }

        self.arena.free(entry.node);
        self.ids.erase(id);
        Some(entry)
    }

    fn emit_book_update<S: EventSink>(&self, sink: &mut S) {
        let best_bid = self.bids.best_bid();
        let best_ask = self.asks.best_ask();
        let bid_qty = if best_bid != EMPTY_BID {
            self.bids.level(best_bid).map_or(0, |l| l.total_qty)
        } else {
            0
        };
        let ask_qty = if best_ask != EMPTY_ASK {
            self.asks.level(best_ask).map_or(0, |l| l.total_qty)
        } else {
            0
        };

        sink.on_book_update(BookUpdate {
            ts: timestamp::now_ns(),
            symbol_id: self.symbol_id,
            best_bid,
            best_ask,
            bid_qty,
            ask_qty,
        });
    }

    // ------------------------------------------------------------------
    // Consistency sweep (tests, debug tooling)
    // ------------------------------------------------------------------

    /// Walk the whole book and assert the structural invariants: cached
    /// bests match the true extremes, level sums match member
    /// quantities, resting quantities are positive, the id index and
    /// the FIFOs agree in both directions, and resting bests never
    /// cross. Panics with a description on the first violation.
    pub fn audit(&self) {
        let mut max_bid = EMPTY_BID;
        let mut min_ask = EMPTY_ASK;
        let mut fifo_orders = 0usize;

        for (side_is_bid, store) in [(true, &self.bids), (false, &self.asks)] {
            store.for_each_nonempty(&mut |px, level| {
                if side_is_bid {
                    max_bid = max_bid.max(px);
                } else {
                    min_ask = min_ask.min(px);
                }

                let mut sum: Qty = 0;
                let mut count = 0u32;
                let mut cur = level.head;
                let mut prev = NULL_INDEX;
                while cur != NULL_INDEX {
                    let node = self.arena.get(cur);
                    assert!(node.qty > 0, "resting qty must be positive at px {px}");
                    assert_eq!(node.prev, prev, "broken back-link at px {px}");
                    let entry = self
                        .ids
                        .find(node.id)
                        .unwrap_or_else(|| panic!("order {} on fifo but not indexed", node.id));
                    assert_eq!(entry.node, cur, "index points at wrong node for {}", node.id);
                    assert_eq!(entry.price, px, "index price mismatch for {}", node.id);
                    assert_eq!(
                        entry.side,
                        if side_is_bid { Side::Bid } else { Side::Ask },
                        "index side mismatch for {}",
                        node.id
                    );
                    sum += node.qty;
                    count += 1;
                    fifo_orders += 1;
                    prev = cur;
                    cur = node.next;
                }
                assert_eq!(level.tail, prev, "tail out of sync at px {px}");
                assert_eq!(level.total_qty, sum, "level sum drift at px {px}");
                assert_eq!(level.count, count, "level count drift at px {px}");
            });
        }

        assert_eq!(
            self.bids.best_bid(),
            max_bid,
            "cached best bid disagrees with sweep"
        );
        assert_eq!(
            self.asks.best_ask(),
            min_ask,
            "cached best ask disagrees with sweep"
        );
        if max_bid != EMPTY_BID && min_ask != EMPTY_ASK {
            assert!(max_bid < min_ask, "book at rest is crossed");
        }
        assert_eq!(
            fifo_orders,
            self.ids.len(),
            "id index size disagrees with fifo population"
        );
        assert_eq!(
            fifo_orders,
            self.arena.in_use(),
            "arena live-node count disagrees with fifo population"
        );
    }
}
