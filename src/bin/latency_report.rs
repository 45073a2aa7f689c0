//! Single-book latency percentiles over a synthetic command mix.
//!
//! Measures the book operations in isolation (no queues, no sinks that
//! allocate) with the calibrated cycle counter.

use hdrhistogram::Histogram;

use lobcore::command::OrderCommand;
use lobcore::order_book::{NullSink, OrderBook};
use lobcore::timestamp::{self, LatencyTimer};
use lobcore::types::{PriceBand, Side};

const WARMUP_OPS: u64 = 10_000;
const ITERATIONS: u64 = 1_000_000;

fn command_for(i: u64) -> OrderCommand {
    let side = if i % 2 == 0 { Side::Bid } else { Side::Ask };
    // Bids low, asks high: roughly half the flow rests, half crosses as
    // the bands drift together.
    let px = match side {
        Side::Bid => 9_800 + (i % 250) as i64,
        Side::Ask => 10_050 - (i % 250) as i64,
    };
    OrderCommand::limit(i + 1, 1 + (i % 64) as u32, side, px, 1 + (i % 50) as i64)
        .with_recv_ts(i)
}

fn main() {
    println!("calibrating cycle counter...");
    timestamp::calibrate();

    let mut book = OrderBook::banded(0, PriceBand::new(1, 20_000));
    let mut sink = NullSink;
    book.warm_up();

    println!("warming up ({WARMUP_OPS} ops)...");
    for i in 0..WARMUP_OPS {
        book.submit_limit(&command_for(i), &mut sink);
    }

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 1_000_000, 3).expect("histogram");

    println!("running {ITERATIONS} iterations...");
    for i in 0..ITERATIONS {
        let cmd = command_for(WARMUP_OPS + i);
        let timer = LatencyTimer::start();
        std::hint::black_box(book.submit_limit(&cmd, &mut sink));
        histogram.record(timer.elapsed_ns().max(1)).ok();
    }

    println!("\n=== submit_limit latency (ns) ===");
    println!("Min:    {:6}", histogram.min());
    println!("P50:    {:6}", histogram.value_at_quantile(0.50));
    println!("P90:    {:6}", histogram.value_at_quantile(0.90));
    println!("P99:    {:6}", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6}", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6}", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6}", histogram.max());
    println!("orders resting at exit: {}", book.order_count());
}
