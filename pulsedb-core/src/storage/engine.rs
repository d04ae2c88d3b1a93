//! Storage engine - top-level coordinator

use crate::concurrent::{ConcurrentMap, ConcurrentSet};
use crate::config::{DEFAULT_CACHE_SIZE, DEFAULT_HANDLE_CAPACITY, INDEX_INTERVAL};
use crate::downsample::{downsample, Aggregation};
use crate::error::{PulseError, Result};
use crate::fanout::FanoutBus;
use crate::ring::RingBuffer;
use crate::storage::record::{self, IndexEntry, RECORD_SIZE};
use crate::storage::{reader, HandlePool};
use crate::types::{DataPoint, KeyCount, Timestamp};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding every `key.aof` / `key.idx` pair
    pub data_dir: PathBuf,
    /// Per-key ring-buffer capacity; 0 disables the tail cache
    pub cache_size: usize,
    /// Capacity of each file-handle LRU
    pub handle_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_size: DEFAULT_CACHE_SIZE,
            handle_capacity: DEFAULT_HANDLE_CAPACITY,
        }
    }
}

type LockMap = ConcurrentMap<String, Arc<Mutex<()>>>;

/// PulseDB storage engine
///
/// One `Engine` value owns all engine state; construct it once with
/// [`Engine::open`] and share it behind an `Arc`.
pub struct Engine {
    config: EngineConfig,
    pool: HandlePool,

    /// Every key with an existing AOF
    keys: ConcurrentSet<String>,
    /// Records appended per key, seeded from `file size / 16` on first open
    counts: ConcurrentMap<String, Arc<AtomicI64>>,
    /// Per-key tail caches (only populated when `cache_size > 0`)
    rings: ConcurrentMap<String, Arc<Mutex<RingBuffer<DataPoint>>>>,
    /// Most recent `(timestamp, value)` per key, the `last(1)` shortcut
    last_points: ConcurrentMap<String, (Timestamp, f64)>,

    /// Serialises appends per key
    write_locks: LockMap,
    /// Serialises merge-rewrites per key; outer lock of the patch path
    patch_locks: LockMap,
    /// Serialises renames and deletes across all keys
    rename_lock: Mutex<()>,

    bus: FanoutBus,
}

impl Engine {
    /// Open the engine, creating the data directory if missing and
    /// registering every key found on disk.
    pub fn open(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let engine = Self {
            pool: HandlePool::new(config.data_dir.clone(), config.handle_capacity),
            keys: ConcurrentSet::new(),
            counts: ConcurrentMap::new(),
            rings: ConcurrentMap::new(),
            last_points: ConcurrentMap::new(),
            write_locks: ConcurrentMap::new(),
            patch_locks: ConcurrentMap::new(),
            rename_lock: Mutex::new(()),
            bus: FanoutBus::new(),
            config,
        };

        engine.init_id_set()?;
        info!(
            data_dir = %engine.config.data_dir.display(),
            keys = engine.keys.len(),
            handle_capacity = engine.config.handle_capacity,
            "opened engine"
        );
        Ok(engine)
    }

    fn init_id_set(&self) -> Result<()> {
        for entry in fs::read_dir(&self.config.data_dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(".aof") {
                if !key.is_empty() {
                    self.keys.add(key.to_string());
                }
            }
        }
        Ok(())
    }

    /// The fan-out bus carrying every successful write.
    pub fn fanout(&self) -> &FanoutBus {
        &self.bus
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn write_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .load_or_store(key.to_string(), Arc::new(Mutex::new(())))
    }

    fn patch_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.patch_locks
            .load_or_store(key.to_string(), Arc::new(Mutex::new(())))
    }

    /// The running record count for `key`, seeded from the stat'd file
    /// size the first time the key's AOF is opened.
    fn count_for(&self, key: &str, data: &fs::File) -> Result<Arc<AtomicI64>> {
        if let Some(count) = self.counts.load(key) {
            return Ok(count);
        }
        let records = (data.metadata()?.len() / RECORD_SIZE as u64) as i64;
        Ok(self
            .counts
            .load_or_store(key.to_string(), Arc::new(AtomicI64::new(records))))
    }

    /// Append a batch to `key`'s AOF under the per-key write lock.
    ///
    /// Every `INDEX_INTERVAL`-th record emits a sparse index entry at the
    /// record's start offset. The batch is fsynced before returning, so
    /// a successful call means every point is durable.
    pub fn append(&self, key: &str, points: &[DataPoint]) -> Result<()> {
        if key.is_empty() {
            return Err(PulseError::InvalidKey(key.to_string()));
        }
        if points.is_empty() {
            return Ok(());
        }

        let lock = self.write_lock(key);
        let _guard = lock.lock();

        let data = self.pool.data_file(key)?;
        let index = self.pool.index_file(key)?;
        let count = self.count_for(key, &data)?;

        for point in points {
            (&*data).write_all(&record::encode_data(point.timestamp, point.value))?;
            let total = count.fetch_add(1, Ordering::SeqCst) + 1;
            if total % INDEX_INTERVAL == 0 {
                let entry = IndexEntry {
                    timestamp: point.timestamp,
                    offset: (data.metadata()?.len() - RECORD_SIZE as u64) as i64,
                };
                (&*index).write_all(&entry.encode())?;
            }
        }
        data.sync_all()?;

        Ok(())
    }

    /// Write one point through the full path: append, tail cache,
    /// last-value shortcut, then synchronous fan-out. A subscriber
    /// registered before this call sees the point before it returns.
    pub fn write(&self, point: DataPoint) -> Result<()> {
        self.keys.add(point.key.clone());
        self.append(&point.key, std::slice::from_ref(&point))?;

        if self.config.cache_size > 0 {
            let ring = self.rings.load_or_store(
                point.key.clone(),
                Arc::new(Mutex::new(RingBuffer::new(self.config.cache_size))),
            );
            ring.lock().push(point.clone());
        }
        self.last_points
            .store(point.key.clone(), (point.timestamp, point.value));

        self.bus.publish(&point);
        Ok(())
    }

    /// Range query over `[start, end]` (inclusive), served from the ring
    /// buffer when it has matching points and the files otherwise.
    /// `downsample_interval > 1` buckets the result.
    pub fn read(
        &self,
        key: &str,
        start: Timestamp,
        end: Timestamp,
        downsample_interval: i64,
        aggregation: Aggregation,
    ) -> Result<Vec<DataPoint>> {
        let mut points = self.read_buffered(key, start, end);
        if points.is_empty() {
            points = self.read_filed(key, start, end)?;
        }
        if downsample_interval > 1 {
            points = downsample(&points, downsample_interval, aggregation);
        }
        Ok(points)
    }

    fn read_buffered(&self, key: &str, start: Timestamp, end: Timestamp) -> Vec<DataPoint> {
        if self.config.cache_size == 0 {
            return Vec::new();
        }
        let Some(ring) = self.rings.load(key) else {
            return Vec::new();
        };
        let ring = ring.lock();
        ring.iter()
            .filter(|p| p.timestamp >= start && p.timestamp <= end)
            .cloned()
            .collect()
    }

    fn read_filed(&self, key: &str, start: Timestamp, end: Timestamp) -> Result<Vec<DataPoint>> {
        // a missing key is an empty series, not an error, and a read
        // must not conjure files into the data directory
        if !self.pool.data_path(key).exists() {
            return Ok(Vec::new());
        }
        let data = self.pool.data_file(key)?;
        let index = if self.pool.index_path(key).exists() {
            Some(self.pool.index_file(key)?)
        } else {
            None
        };
        reader::read_range(&data, index.as_deref(), key, start, end)
    }

    /// The last `count` points in append order: `last(1)` from the
    /// last-value map when possible, then the ring buffer when it holds
    /// enough, then the AOF tail.
    pub fn read_last(&self, key: &str, count: usize) -> Result<Vec<DataPoint>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if count == 1 {
            if let Some((timestamp, value)) = self.last_points.load(key) {
                if timestamp != 0 {
                    return Ok(vec![DataPoint::new(key, timestamp, value)]);
                }
            }
        }

        if let Some(ring) = self.rings.load(key) {
            let ring = ring.lock();
            if ring.size() >= count {
                return Ok(ring.last_n(count));
            }
        }

        if !self.pool.data_path(key).exists() {
            return Ok(Vec::new());
        }
        let data = self.pool.data_file(key)?;
        reader::read_tail(&data, key, count)
    }

    /// Merge `points` into `key`'s history, overwriting stored points on
    /// timestamp collision, and rewrite the series timestamp-sorted.
    ///
    /// Runs under the per-key patch lock; the rewrite reuses the delete
    /// and append paths, which take their own locks underneath.
    pub fn patch(&self, key: &str, mut points: Vec<DataPoint>) -> Result<()> {
        if key.is_empty() {
            return Err(PulseError::InvalidKey(key.to_string()));
        }
        if points.is_empty() {
            return Ok(());
        }

        let lock = self.patch_lock(key);
        let _guard = lock.lock();

        points.sort_by_key(|p| p.timestamp);
        let existing = self.read_filed(key, 0, i64::MAX)?;
        let merged = merge_points(points, existing);

        self.delete_key(key)?;
        self.append(key, &merged)?;

        self.keys.add(key.to_string());
        if let Some(last) = merged.last() {
            self.last_points
                .store(key.to_string(), (last.timestamp, last.value));
        }
        Ok(())
    }

    /// Ensure both series files exist and register `key`. A no-op for
    /// the empty key.
    pub fn init_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        let data = self.pool.data_file(key)?;
        self.pool.index_file(key)?;
        self.count_for(key, &data)?;
        self.keys.add(key.to_string());
        Ok(())
    }

    /// Rename a series on disk and in the registry. Cached handles and
    /// all per-key in-memory state are dropped so both names resolve
    /// fresh afterwards.
    pub fn rename_key(&self, key: &str, to: &str) -> Result<()> {
        if key.is_empty() || to.is_empty() {
            return Err(PulseError::InvalidKey(format!("{key:?} -> {to:?}")));
        }
        info!(%key, %to, "renaming key");
        let _guard = self.rename_lock.lock();

        self.pool.forget(key);
        self.forget_key_state(key);
        self.forget_key_state(to);
        self.keys.remove(key);

        fs::rename(self.pool.data_path(key), self.pool.data_path(to))?;
        fs::rename(self.pool.index_path(key), self.pool.index_path(to))?;

        let data = self.pool.data_file(to)?;
        self.pool.index_file(to)?;
        self.count_for(to, &data)?;
        self.keys.add(to.to_string());
        Ok(())
    }

    /// Delete a series: drop handles, evict all per-key state, remove
    /// both files. Deleting an absent key is a no-op.
    pub fn delete_key(&self, key: &str) -> Result<()> {
        info!(%key, "deleting key");
        let _guard = self.rename_lock.lock();

        self.pool.forget(key);
        self.forget_key_state(key);
        self.keys.remove(key);

        remove_if_exists(&self.pool.data_path(key))?;
        remove_if_exists(&self.pool.index_path(key))?;
        Ok(())
    }

    fn forget_key_state(&self, key: &str) {
        self.counts.remove(key);
        self.last_points.remove(key);
        self.rings.remove(key);
    }

    /// All known keys, sorted for stable output.
    pub fn list_keys(&self) -> Vec<String> {
        let mut keys = self.keys.items();
        keys.sort_unstable();
        keys
    }

    /// All known keys with their approximate record counts
    /// (`stat.size / 16`; 0 when the file is gone).
    pub fn list_keys_with_count(&self) -> Vec<KeyCount> {
        self.list_keys()
            .into_iter()
            .map(|key| {
                let count = fs::metadata(self.pool.data_path(&key))
                    .map(|meta| meta.len() / RECORD_SIZE as u64)
                    .unwrap_or(0);
                KeyCount { key, count }
            })
            .collect()
    }

    /// Fsync every currently open data and index handle.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_all()
    }
}

/// Merge two timestamp-sorted sequences; on equal timestamps the new
/// point wins and both cursors advance.
fn merge_points(new: Vec<DataPoint>, existing: Vec<DataPoint>) -> Vec<DataPoint> {
    let mut merged = Vec::with_capacity(new.len() + existing.len());
    let mut new_iter = new.into_iter().peekable();
    let mut existing_iter = existing.into_iter().peekable();

    loop {
        let take_new = match (new_iter.peek(), existing_iter.peek()) {
            (Some(n), Some(e)) if n.timestamp == e.timestamp => {
                // collision: the patched point wins, the stored one is dropped
                existing_iter.next();
                true
            }
            (Some(n), Some(e)) => n.timestamp < e.timestamp,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_new {
            merged.extend(new_iter.next());
        } else {
            merged.extend(existing_iter.next());
        }
    }

    merged
}

fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
