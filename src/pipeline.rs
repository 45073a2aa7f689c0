//! Pipeline composition: feed -> K matching threads -> publisher.
//!
//! One command queue and one event queue per symbol; every queue has
//! exactly one producer and one consumer thread. The feed runs on the
//! calling thread; engines and the publisher are spawned. Shutdown flows
//! forward: feed completion raises a flag, each engine drains and
//! decrements the live count, the publisher drains until the count hits
//! zero.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::command::{EngineEvent, OrderCommand};
use crate::config::PipelineConfig;
use crate::engine::Engine;
use crate::feed::FeedHandler;
use crate::order_book::OrderBook;
use crate::publisher::{Publisher, PublisherStats};
use crate::spsc::SpscQueue;
use crate::timestamp;

/// Counters from one completed replay.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineReport {
    pub commands: u64,
    pub trades: u64,
    pub book_updates: u64,
}

/// Pin the current thread when a core id is configured.
fn pin_to_core(core: Option<usize>) {
    let Some(want) = core else { return };
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!("core pinning unavailable on this platform");
        return;
    };
    match cores.into_iter().find(|c| c.id == want) {
        Some(id) => {
            core_affinity::set_for_current(id);
        }
        None => warn!("core {want} not present, running unpinned"),
    }
}

/// Replay `cfg.input` to completion and return the counters.
pub fn run(cfg: &PipelineConfig) -> Result<PipelineReport> {
    cfg.validate()?;
    timestamp::calibrate();

    let num_symbols = cfg.symbols.len();
    let band = cfg.band();
    info!(
        "pipeline: {} symbols, band [{}, {}], queues of {}",
        num_symbols, band.min_tick, band.max_tick, cfg.queue_capacity
    );

    let command_queues: Vec<Arc<SpscQueue<OrderCommand>>> = (0..num_symbols)
        .map(|_| Arc::new(SpscQueue::new(cfg.queue_capacity)))
        .collect();
    let event_queues: Vec<Arc<SpscQueue<EngineEvent>>> = (0..num_symbols)
        .map(|_| Arc::new(SpscQueue::new(cfg.queue_capacity)))
        .collect();

    let feed_done = Arc::new(AtomicBool::new(false));
    let engines_live = Arc::new(AtomicUsize::new(num_symbols));

    let core_for = |slot: usize| cfg.cpu_cores.as_ref().map(|cores| cores[slot]);

    // Publisher drains all event queues.
    let publisher_handle = {
        let queues = event_queues.clone();
        let output = cfg.output.clone();
        let engines_live = Arc::clone(&engines_live);
        let core = core_for(num_symbols + 1);
        thread::Builder::new()
            .name("publisher".into())
            .spawn(move || -> Result<PublisherStats> {
                pin_to_core(core);
                Publisher::new(output, queues).run(&engines_live)
            })
            .context("spawn publisher")?
    };

    // One matching thread per symbol.
    let mut engine_handles = Vec::with_capacity(num_symbols);
    for (i, name) in cfg.symbols.iter().enumerate() {
        let input = Arc::clone(&command_queues[i]);
        let output = Arc::clone(&event_queues[i]);
        let feed_done = Arc::clone(&feed_done);
        let engines_live = Arc::clone(&engines_live);
        let spin = cfg.spin_loops_per_yield;
        let core = core_for(i + 1);
        let handle = thread::Builder::new()
            .name(format!("engine-{name}"))
            .spawn(move || {
                pin_to_core(core);
                let mut engine = Engine::new(OrderBook::banded(i as u32, band));
                engine.run(&input, &output, &feed_done, &engines_live, spin);
            })
            .with_context(|| format!("spawn engine {name}"))?;
        engine_handles.push(handle);
    }

    // Feed on the calling thread.
    pin_to_core(core_for(0));
    let feed = FeedHandler::new(
        cfg.input.clone(),
        command_queues.clone(),
        cfg.spin_loops_per_yield,
    );
    let feed_result = feed.run();
    feed_done.store(true, Ordering::Release);

    for handle in engine_handles {
        if handle.join().is_err() {
            // A panicked engine never reached its live-count decrement;
            // take it over so the publisher can still drain and exit.
            warn!("an engine thread panicked");
            engines_live.fetch_sub(1, Ordering::AcqRel);
        }
    }
    let stats = match publisher_handle.join() {
        Ok(res) => res?,
        Err(_) => {
            warn!("publisher thread panicked");
            PublisherStats::default()
        }
    };

    let commands = feed_result?;
    let report = PipelineReport {
        commands,
        trades: stats.trades,
        book_updates: stats.book_updates,
    };
    info!(
        "pipeline: done - {} commands, {} trades, {} book updates",
        report.commands, report.trades, report.book_updates
    );
    Ok(report)
}
