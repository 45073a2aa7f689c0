//! Matching thread - one order book, one command queue, one event queue.
//!
//! Run-to-completion per command: the book never suspends mid-operation,
//! the thread only waits on queue-empty (pause, then yield) and
//! queue-full on the event side.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::info;

use crate::command::{kind, EngineEvent, OrderCommand};
use crate::levels::LevelStore;
use crate::order_book::{EventSink, OrderBook};
use crate::spsc::{Backoff, SpscQueue};
use crate::types::OrderType;

/// Sink that forwards each event into the symbol's SPSC event queue,
/// spinning (never dropping) when the publisher lags.
pub struct QueueSink<'a> {
    queue: &'a SpscQueue<EngineEvent>,
    spin_loops_per_yield: u32,
}

impl<'a> QueueSink<'a> {
    pub fn new(queue: &'a SpscQueue<EngineEvent>, spin_loops_per_yield: u32) -> Self {
        Self {
            queue,
            spin_loops_per_yield,
        }
    }

    #[inline]
    fn push(&self, ev: EngineEvent) {
        let mut backoff = Backoff::new(self.spin_loops_per_yield);
        while !self.queue.push(ev) {
            backoff.snooze();
        }
    }
}

impl EventSink for QueueSink<'_> {
    #[inline]
    fn on_trade(&mut self, ev: crate::command::TradeEvent) {
        self.push(EngineEvent::Trade(ev));
    }

    #[inline]
    fn on_book_update(&mut self, ev: crate::command::BookUpdate) {
        self.push(EngineEvent::Book(ev));
    }
}

/// Per-symbol matching loop around an [`OrderBook`].
pub struct Engine<L: LevelStore> {
    book: OrderBook<L>,
}

impl<L: LevelStore> Engine<L> {
    pub fn new(book: OrderBook<L>) -> Self {
        Self { book }
    }

    pub fn book(&self) -> &OrderBook<L> {
        &self.book
    }

    /// Apply one command. Unknown kinds and garbage enum bytes are
    /// dropped without touching the book.
    pub fn apply<S: EventSink>(&mut self, cmd: &OrderCommand, sink: &mut S) {
        match cmd.kind {
            kind::NEW_ORDER => match cmd.order_type() {
                // Stop variants carry their trigger fields through the
                // schema but match like their plain counterparts; there
                // is no trigger loop in the core.
                Some(OrderType::Limit) | Some(OrderType::StopLimit) => {
                    self.book.submit_limit(cmd, sink);
                }
                Some(OrderType::Market) | Some(OrderType::StopMarket) => {
                    self.book.submit_market(cmd, sink);
                }
                None => {}
            },
            kind::CANCEL_ORDER => {
                self.book.cancel(cmd.order_id, sink);
            }
            kind::MODIFY_ORDER => {
                self.book.modify(cmd.order_id, cmd.price_ticks, cmd.qty, cmd.recv_ts, sink);
            }
            _ => {}
        }
    }

    /// Drain the command queue until the feed is done and the queue is
    /// empty, then decrement `engines_live` and exit.
    pub fn run(
        &mut self,
        input: &SpscQueue<OrderCommand>,
        output: &SpscQueue<EngineEvent>,
        feed_done: &AtomicBool,
        engines_live: &AtomicUsize,
        spin_loops_per_yield: u32,
    ) {
        self.book.warm_up();
        let mut sink = QueueSink::new(output, spin_loops_per_yield);
        let mut processed = 0u64;
        let mut backoff = Backoff::new(spin_loops_per_yield);

        loop {
            if let Some(cmd) = input.pop() {
                self.apply(&cmd, &mut sink);
                processed += 1;
                backoff.reset();
                continue;
            }
            if feed_done.load(Ordering::Acquire) && input.is_empty() {
                break;
            }
            backoff.snooze();
        }

        info!(
            "engine[{}]: {} commands processed, {} resting",
            self.book.symbol(),
            processed,
            self.book.order_count()
        );
        engines_live.fetch_sub(1, Ordering::AcqRel);
    }
}
