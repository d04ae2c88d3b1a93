//! PulseDB Core - Per-Key Time-Series Storage Engine
//!
//! An embeddable single-node engine that ingests `(key, timestamp, value)`
//! triples at high rate, persists them to per-key append-only logs, and
//! serves range and tail queries over recent and historical data.
//!
//! # Architecture
//!
//! Each key owns two files in the data directory:
//!
//! - **AOF** (`key.aof`): append-only log of fixed 16-byte binary records
//! - **Sparse index** (`key.idx`): one `(timestamp, offset)` entry per
//!   [`config::INDEX_INTERVAL`] appended records, used to seek range reads
//!
//! In front of the files sit an optional per-key ring buffer for tail
//! reads, a last-value shortcut answering `last(1)` queries in O(1), and a
//! bounded LRU of open file handles so thousands of keys never exhaust the
//! process descriptor limit. Every successful write is fanned out
//! synchronously to all registered subscribers.

pub mod concurrent;
pub mod downsample;
pub mod fanout;
pub mod ops;
pub mod ring;
pub mod storage;

mod error;
mod types;

pub use error::{PulseError, Result};
pub use ops::{Operation, ReadParams, Response, ResponseData, ServerInfo, WriteBody};
pub use storage::{Engine, EngineConfig};
pub use types::*;

/// PulseDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// One sparse index entry is written every this many appended records.
    pub const INDEX_INTERVAL: i64 = 5_000;

    /// Default capacity of each file-handle LRU.
    ///
    /// Many systems cap a process at 1024 descriptors and every key needs
    /// two files, so the pool must stay well below half the limit.
    pub const DEFAULT_HANDLE_CAPACITY: usize = 700;

    /// Default per-key ring-buffer capacity; 0 disables the tail cache.
    pub const DEFAULT_CACHE_SIZE: usize = 0;
}
