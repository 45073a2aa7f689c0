//! Command and event records.
//!
//! These are the exact on-wire shapes: the feed handler reinterprets a
//! mmap'd file as a run of [`OrderCommand`]s, and the publisher appends
//! [`TradeEvent`]/[`BookUpdate`] records to the binary logs verbatim.
//! Native endianness, tightly packed.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::types::{OrderId, OrderType, Qty, Side, SymbolId, Tick, TimeInForce, Timestamp, UserId};

/// Command discriminants (`OrderCommand::kind`).
pub mod kind {
    pub const NEW_ORDER: u8 = 0;
    pub const CANCEL_ORDER: u8 = 1;
    pub const MODIFY_ORDER: u8 = 2;
}

/// One fixed-size command record from the feed.
///
/// Enum-ish fields (`kind`, `side`, `order_type`, `tif`) are raw bytes
/// on the wire; use the typed accessors, which return `None` for values
/// a well-behaved producer never emits.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes)]
pub struct OrderCommand {
    pub kind: u8,
    pub recv_ts: u64,
    pub order_id: u64,
    pub symbol_id: u32,
    pub user_id: u32,
    pub price_ticks: i64,
    pub qty: i64,
    pub side: u8,
    pub order_type: u8,
    pub tif: u8,
    pub flags: u32,
    pub stop_price: i64,
    pub display_qty: i64,
    pub expiry_ts: u64,
}

const _: () = assert!(std::mem::size_of::<OrderCommand>() == 72);

impl OrderCommand {
    #[inline]
    pub fn side(&self) -> Option<Side> {
        Side::from_u8(self.side)
    }

    #[inline]
    pub fn order_type(&self) -> Option<OrderType> {
        OrderType::from_u8(self.order_type)
    }

    #[inline]
    pub fn tif(&self) -> Option<TimeInForce> {
        TimeInForce::from_u8(self.tif)
    }

    #[inline]
    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    /// New limit order, GTC unless overridden.
    pub fn limit(
        order_id: OrderId,
        user_id: UserId,
        side: Side,
        price_ticks: Tick,
        qty: Qty,
    ) -> Self {
        Self {
            kind: kind::NEW_ORDER,
            recv_ts: 0,
            order_id,
            symbol_id: 0,
            user_id,
            price_ticks,
            qty,
            side: side as u8,
            order_type: OrderType::Limit as u8,
            tif: TimeInForce::Gtc as u8,
            flags: 0,
            stop_price: 0,
            display_qty: 0,
            expiry_ts: 0,
        }
    }

    /// New market order. `price_ticks` is ignored by the book.
    pub fn market(order_id: OrderId, user_id: UserId, side: Side, qty: Qty) -> Self {
        let mut cmd = Self::limit(order_id, user_id, side, 0, qty);
        cmd.order_type = OrderType::Market as u8;
        cmd
    }

    /// Cancel by id.
    pub fn cancel(order_id: OrderId) -> Self {
        let mut cmd = Self::limit(order_id, 0, Side::Bid, 0, 0);
        cmd.kind = kind::CANCEL_ORDER;
        cmd
    }

    /// Modify to a new price/quantity.
    pub fn modify(order_id: OrderId, new_price: Tick, new_qty: Qty) -> Self {
        let mut cmd = Self::limit(order_id, 0, Side::Bid, new_price, new_qty);
        cmd.kind = kind::MODIFY_ORDER;
        cmd
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif as u8;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_recv_ts(mut self, ts: Timestamp) -> Self {
        self.recv_ts = ts;
        self
    }

    pub fn with_symbol(mut self, symbol_id: SymbolId) -> Self {
        self.symbol_id = symbol_id;
        self
    }
}

/// One execution between a taker and a resting maker, at maker price.
/// Written to `trades.bin` in emission order.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct TradeEvent {
    pub ts: u64,
    pub taker_id: u64,
    pub maker_id: u64,
    pub symbol_id: u32,
    pub price_ticks: i64,
    pub qty: i64,
}

const _: () = assert!(std::mem::size_of::<TradeEvent>() == 44);

/// Best-of-book snapshot, emitted once at the end of every public book
/// operation. Bests may be the empty sentinels. Written to
/// `book_updates.bin` in emission order.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct BookUpdate {
    pub ts: u64,
    pub symbol_id: u32,
    pub best_bid: i64,
    pub best_ask: i64,
    pub bid_qty: i64,
    pub ask_qty: i64,
}

const _: () = assert!(std::mem::size_of::<BookUpdate>() == 44);

/// Outcome of a submit/modify call.
///
/// `filled + remaining <= qty`; `remaining` is the quantity left resting
/// (always zero for IOC/FOK), except for market orders where it reports
/// the unfillable portion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub filled: Qty,
    pub remaining: Qty,
}

impl ExecResult {
    pub const REJECTED: ExecResult = ExecResult { filled: 0, remaining: 0 };

    #[inline]
    pub const fn new(filled: Qty, remaining: Qty) -> Self {
        Self { filled, remaining }
    }
}

/// Either output record, as carried on a per-symbol event queue.
#[derive(Clone, Copy, Debug)]
pub enum EngineEvent {
    Trade(TradeEvent),
    Book(BookUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_are_wire_exact() {
        assert_eq!(std::mem::size_of::<OrderCommand>(), 72);
        assert_eq!(std::mem::size_of::<TradeEvent>(), 44);
        assert_eq!(std::mem::size_of::<BookUpdate>(), 44);
    }

    #[test]
    fn command_round_trips_through_bytes() {
        let cmd = OrderCommand::limit(7, 42, Side::Ask, 155, 30)
            .with_tif(TimeInForce::Ioc)
            .with_flags(crate::types::flags::STP)
            .with_symbol(3)
            .with_recv_ts(999);
        let bytes = cmd.as_bytes().to_vec();
        let back = OrderCommand::read_from(bytes.as_slice()).unwrap();
        assert_eq!({ back.order_id }, 7);
        assert_eq!({ back.user_id }, 42);
        assert_eq!(back.side(), Some(Side::Ask));
        assert_eq!(back.tif(), Some(TimeInForce::Ioc));
        assert_eq!({ back.symbol_id }, 3);
        assert_eq!({ back.recv_ts }, 999);
        assert!(back.has_flag(crate::types::flags::STP));
    }

    #[test]
    fn accessors_reject_garbage_bytes() {
        let mut cmd = OrderCommand::limit(1, 1, Side::Bid, 100, 1);
        cmd.side = 9;
        cmd.tif = 9;
        cmd.order_type = 9;
        assert_eq!(cmd.side(), None);
        assert_eq!(cmd.tif(), None);
        assert_eq!(cmd.order_type(), None);
    }

    #[test]
    fn trade_event_round_trips() {
        let ev = TradeEvent {
            ts: 1,
            taker_id: 2,
            maker_id: 3,
            symbol_id: 4,
            price_ticks: 150,
            qty: 25,
        };
        let back = TradeEvent::read_from(ev.as_bytes()).unwrap();
        assert_eq!(back, ev);
    }
}
