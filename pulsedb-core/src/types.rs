//! Core types for PulseDB

use serde::{Deserialize, Serialize};

/// Timestamp in seconds since Unix epoch by convention; any monotonic
/// signed 64-bit domain works.
pub type Timestamp = i64;

/// A single data point of one series.
///
/// The key lives only in memory; on disk it is implicit from which file
/// the record is stored in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Series key (non-empty UTF-8)
    pub key: String,
    /// Timestamp, stored raw
    pub timestamp: Timestamp,
    /// Value, stored raw
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(key: impl Into<String>, timestamp: Timestamp, value: f64) -> Self {
        Self {
            key: key.into(),
            timestamp,
            value,
        }
    }
}

/// A key together with its approximate record count (`file size / 16`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCount {
    pub key: String,
    pub count: u64,
}
