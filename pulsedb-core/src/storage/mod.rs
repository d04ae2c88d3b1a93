//! Per-key storage engine
//!
//! Each series lives in two append-only files, `key.aof` (16-byte binary
//! records) and `key.idx` (a sparse timestamp→offset index). The
//! [`Engine`] composes the handle pool, per-key locks, registry, tail
//! cache, and fan-out bus into a single value constructed once.

mod engine;
mod handles;
mod reader;
mod record;

pub use engine::{Engine, EngineConfig};
pub use record::{IndexEntry, RECORD_SIZE};

pub(crate) use handles::HandlePool;
