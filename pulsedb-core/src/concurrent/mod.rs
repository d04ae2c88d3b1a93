//! Shared concurrent primitives
//!
//! The engine keys almost all of its state by series name: handle pools,
//! counters, locks, the key registry. These wrappers give that state a
//! small, uniform surface that is safe under arbitrary concurrency.

mod lru;
mod map;
mod set;

pub use lru::EvictingLru;
pub use map::ConcurrentMap;
pub use set::ConcurrentSet;
