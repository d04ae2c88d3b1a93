//! Bit-exact 16-byte record codec
//!
//! Both file kinds store identically shaped records, little-endian, with
//! no header, checksum, or separators:
//!
//! - AOF: bytes 0..8 signed timestamp, bytes 8..16 IEEE-754 value
//! - Index: bytes 0..8 signed timestamp, bytes 8..16 signed byte offset

use crate::types::Timestamp;
use bytes::{Buf, BufMut};

/// On-disk size of every record, in both `.aof` and `.idx` files.
pub const RECORD_SIZE: usize = 16;

/// Encode one data record.
pub fn encode_data(timestamp: Timestamp, value: f64) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    let mut cursor = &mut buf[..];
    cursor.put_i64_le(timestamp);
    cursor.put_f64_le(value);
    buf
}

/// Decode one data record.
pub fn decode_data(buf: &[u8; RECORD_SIZE]) -> (Timestamp, f64) {
    let mut cursor = &buf[..];
    let timestamp = cursor.get_i64_le();
    let value = cursor.get_f64_le();
    (timestamp, value)
}

/// One sparse-index entry: the byte offset of a record's start within
/// the AOF, keyed by that record's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: Timestamp,
    pub offset: i64,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let mut cursor = &mut buf[..];
        cursor.put_i64_le(self.timestamp);
        cursor.put_i64_le(self.offset);
        buf
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut cursor = &buf[..];
        Self {
            timestamp: cursor.get_i64_le(),
            offset: cursor.get_i64_le(),
        }
    }
}
