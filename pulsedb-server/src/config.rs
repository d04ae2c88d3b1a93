//! Server configuration

use pulsedb_core::config::{DEFAULT_CACHE_SIZE, DEFAULT_HANDLE_CAPACITY};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration, loadable from a JSON file; every field falls
/// back to its default when absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address (line-delimited JSON protocol)
    pub tcp_addr: SocketAddr,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Data directory
    pub data_dir: PathBuf,
    /// Per-key ring-buffer capacity; 0 disables the tail cache
    pub cache_size: usize,
    /// Capacity of each file-handle LRU
    pub handle_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: "0.0.0.0:5555".parse().unwrap(),
            http_addr: "0.0.0.0:5556".parse().unwrap(),
            data_dir: PathBuf::from("data"),
            cache_size: DEFAULT_CACHE_SIZE,
            handle_capacity: DEFAULT_HANDLE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }
}
