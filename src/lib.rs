//! # lobcore
//!
//! A sharded limit-order matching engine built for sub-microsecond
//! per-order latency on a single symbol.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: each symbol's book is owned by one matching
//!   thread exclusively (no locks anywhere in the match path)
//! - **Slab Allocation**: order nodes come from mmap-backed slabs,
//!   addressed by 32-bit handles; no heap traffic in the hot path
//! - **Deterministic**: per symbol, the published trade and book-update
//!   streams are a pure function of the command stream
//!
//! ## Architecture
//!
//! ```text
//! [Feed Handler] --SPSC--> [Engine 0 .. Engine K-1] --SPSC--> [Publisher]
//!   (mmap file)              (one book per symbol)            (trades.bin,
//!                                                         book_updates.bin)
//! ```

pub mod arena;
pub mod command;
pub mod config;
pub mod engine;
pub mod feed;
pub mod id_index;
pub mod levels;
pub mod order_book;
pub mod pipeline;
pub mod price_level;
pub mod publisher;
pub mod spsc;
pub mod timestamp;
pub mod types;

// Re-exports for convenience
pub use arena::{NodeIndex, OrderNode, SlabArena, NULL_INDEX};
pub use command::{BookUpdate, EngineEvent, ExecResult, OrderCommand, TradeEvent};
pub use config::PipelineConfig;
pub use engine::Engine;
pub use levels::{ArrayLevels, LevelStore, TreeLevels};
pub use order_book::{EventSink, NullSink, OrderBook, RecordingSink};
pub use price_level::LevelFifo;
pub use spsc::SpscQueue;
pub use types::{
    PriceBand, Qty, Side, SymbolId, Tick, TimeInForce, OrderType, EMPTY_ASK, EMPTY_BID,
};
