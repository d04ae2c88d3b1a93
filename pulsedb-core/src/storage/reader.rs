//! Range and tail reads over a series' files
//!
//! All reads are positional (`read_exact_at`), so concurrent readers
//! never share a cursor and a write racing the tail simply terminates
//! the stream at the last whole record.

use crate::error::Result;
use crate::storage::record::{self, IndexEntry, RECORD_SIZE};
use crate::types::{DataPoint, Timestamp};
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;

/// Scan the sparse index for the largest entry with `ts <= start`,
/// returning its AOF byte offset, or 0 when no entry qualifies.
/// Equal timestamps keep scanning, so ties go to the later entry.
fn seek_offset(index: &File, start: Timestamp) -> Result<u64> {
    let mut offset = 0u64;
    let mut pos = 0u64;
    let mut buf = [0u8; RECORD_SIZE];

    loop {
        match index.read_exact_at(&mut buf, pos) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let entry = IndexEntry::decode(&buf);
        if entry.timestamp > start {
            break;
        }
        offset = entry.offset as u64;
        pos += RECORD_SIZE as u64;
    }

    Ok(offset)
}

/// Stream every record with `start <= ts <= end`, in append order.
/// Records are assumed timestamp-ordered past the seek point; the scan
/// stops at the first record beyond `end`.
pub(crate) fn read_range(
    data: &File,
    index: Option<&File>,
    key: &str,
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<DataPoint>> {
    let mut pos = match index {
        Some(index) => seek_offset(index, start)?,
        None => 0,
    };

    let mut points = Vec::new();
    let mut buf = [0u8; RECORD_SIZE];
    loop {
        match data.read_exact_at(&mut buf, pos) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let (timestamp, value) = record::decode_data(&buf);
        if timestamp > end {
            break;
        }
        if timestamp >= start {
            points.push(DataPoint::new(key, timestamp, value));
        }
        pos += RECORD_SIZE as u64;
    }

    Ok(points)
}

/// Read up to the last `count` records, oldest of the returned set
/// first. The start position is derived from the stat'd size so the
/// seek is always record-aligned, even with appends in flight.
pub(crate) fn read_tail(data: &File, key: &str, count: usize) -> Result<Vec<DataPoint>> {
    let len = data.metadata()?.len();
    let available = (len / RECORD_SIZE as u64) as usize;
    let count = count.min(available);

    let mut pos = ((available - count) * RECORD_SIZE) as u64;
    let mut points = Vec::with_capacity(count);
    let mut buf = [0u8; RECORD_SIZE];
    for _ in 0..count {
        match data.read_exact_at(&mut buf, pos) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let (timestamp, value) = record::decode_data(&buf);
        points.push(DataPoint::new(key, timestamp, value));
        pos += RECORD_SIZE as u64;
    }

    Ok(points)
}
