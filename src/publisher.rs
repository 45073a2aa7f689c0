//! Publisher - drains every event queue into two append-only binary logs.
//!
//! Single-threaded writer: trades to `trades.bin`, book updates to
//! `book_updates.bin`, raw records in emission order per symbol,
//! arbitrary interleaving across symbols. A failed write is reported and
//! skipped; the stream continues.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use zerocopy::AsBytes;

use crate::command::EngineEvent;
use crate::spsc::SpscQueue;

pub const TRADES_LOG: &str = "trades.bin";
pub const BOOK_UPDATES_LOG: &str = "book_updates.bin";

#[derive(Clone, Copy, Debug, Default)]
pub struct PublisherStats {
    pub trades: u64,
    pub book_updates: u64,
}

fn open_log(path: PathBuf) -> Option<BufWriter<File>> {
    match File::create(&path) {
        Ok(f) => Some(BufWriter::new(f)),
        Err(e) => {
            error!("publisher: open {} failed: {e}", path.display());
            None
        }
    }
}

pub struct Publisher {
    output_dir: PathBuf,
    queues: Vec<Arc<SpscQueue<EngineEvent>>>,
}

impl Publisher {
    pub fn new(output_dir: PathBuf, queues: Vec<Arc<SpscQueue<EngineEvent>>>) -> Self {
        Self { output_dir, queues }
    }

    /// Drain until every engine has exited (`engines_live == 0`) and the
    /// queues are empty, then flush and report counts.
    ///
    /// I/O failures never stop the drain: the engines block on a full
    /// event queue rather than drop, so the publisher must keep
    /// consuming even when a log cannot be opened or written.
    pub fn run(&self, engines_live: &AtomicUsize) -> Result<PublisherStats> {
        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            error!("publisher: create {} failed: {e}", self.output_dir.display());
        }
        let mut trades = open_log(self.output_dir.join(TRADES_LOG));
        let mut books = open_log(self.output_dir.join(BOOK_UPDATES_LOG));

        let mut stats = PublisherStats::default();
        loop {
            let mut worked = false;
            for queue in &self.queues {
                while let Some(ev) = queue.pop() {
                    worked = true;
                    let res = match ev {
                        EngineEvent::Trade(t) => {
                            stats.trades += 1;
                            trades.as_mut().map(|w| w.write_all(t.as_bytes()))
                        }
                        EngineEvent::Book(b) => {
                            stats.book_updates += 1;
                            books.as_mut().map(|w| w.write_all(b.as_bytes()))
                        }
                    };
                    if let Some(Err(e)) = res {
                        error!("publisher: log write failed: {e}");
                    }
                }
            }

            if !worked {
                if engines_live.load(Ordering::Acquire) == 0
                    && self.queues.iter().all(|q| q.is_empty())
                {
                    break;
                }
                std::thread::yield_now();
            }
        }

        for (writer, tag) in [(&mut trades, "trade"), (&mut books, "book")] {
            if let Some(Err(e)) = writer.as_mut().map(|w| w.flush()) {
                error!("publisher: {tag} log flush failed: {e}");
            }
        }
        info!(
            "publisher: {} trades, {} book updates written",
            stats.trades, stats.book_updates
        );
        Ok(stats)
    }
}
