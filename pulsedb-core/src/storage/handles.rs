//! Bounded pool of open series files
//!
//! The engine cannot hold one descriptor per key: two files per key
//! against a typical 1024-descriptor limit saturates around 500 keys.
//! Both file kinds get their own LRU; a miss opens the file lazily and an
//! insert may evict the least recently used handle.
//!
//! Handles are shared as `Arc<File>`, so eviction only drops the pool's
//! reference; the descriptor closes when the last in-flight reader or
//! writer drops theirs. A reader therefore never sees a handle closed
//! under it.

use crate::concurrent::EvictingLru;
use crate::error::Result;
use crate::storage::record::RECORD_SIZE;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const DATA_SUFFIX: &str = "aof";
const INDEX_SUFFIX: &str = "idx";

pub(crate) struct HandlePool {
    data_dir: PathBuf,
    data_files: EvictingLru<String, Arc<File>>,
    index_files: EvictingLru<String, Arc<File>>,
}

impl HandlePool {
    pub fn new(data_dir: PathBuf, capacity: usize) -> Self {
        Self {
            data_dir,
            data_files: EvictingLru::with_evict(capacity, |key: String, _: Arc<File>| {
                debug!(%key, "releasing evicted data handle");
            }),
            index_files: EvictingLru::with_evict(capacity, |key: String, _: Arc<File>| {
                debug!(%key, "releasing evicted index handle");
            }),
        }
    }

    pub fn data_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.{DATA_SUFFIX}"))
    }

    pub fn index_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.{INDEX_SUFFIX}"))
    }

    /// The open AOF handle for `key`, opening (and creating) the file on
    /// a cache miss.
    pub fn data_file(&self, key: &str) -> Result<Arc<File>> {
        if let Some(file) = self.data_files.get(key) {
            return Ok(file);
        }
        let file = Arc::new(open_series_file(&self.data_path(key))?);
        self.data_files.put(key.to_string(), file.clone());
        Ok(file)
    }

    /// The open index handle for `key`, opening (and creating) the file
    /// on a cache miss.
    pub fn index_file(&self, key: &str) -> Result<Arc<File>> {
        if let Some(file) = self.index_files.get(key) {
            return Ok(file);
        }
        let file = Arc::new(open_series_file(&self.index_path(key))?);
        self.index_files.put(key.to_string(), file.clone());
        Ok(file)
    }

    /// Drop both cached handles for `key` (rename/delete path). The
    /// descriptors close once in-flight references drop.
    pub fn forget(&self, key: &str) {
        self.data_files.remove(key);
        self.index_files.remove(key);
    }

    /// Fsync every pooled handle. Handles are cloned out of the cache
    /// lock first so slow disks never stall other lookups.
    pub fn flush_all(&self) -> Result<()> {
        let mut handles = Vec::new();
        self.data_files.range(|_, file| {
            handles.push(file.clone());
            true
        });
        self.index_files.range(|_, file| {
            handles.push(file.clone());
            true
        });
        for file in handles {
            file.sync_all()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn open_handles(&self) -> usize {
        self.data_files.len() + self.index_files.len()
    }
}

/// Open a series file append+read, creating it if missing, mode 0644.
/// A size that is not a whole number of records means the final write
/// tore; the damaged tail is cut off and the file stays usable.
fn open_series_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .append(true)
        .read(true)
        .create(true)
        .mode(0o644)
        .open(path)?;

    let len = file.metadata()?.len();
    let torn = len % RECORD_SIZE as u64;
    if torn != 0 {
        warn!(path = %path.display(), len, "truncating torn record tail");
        file.set_len(len - torn)?;
    }

    Ok(file)
}
