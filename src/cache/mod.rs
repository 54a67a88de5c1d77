//! Cache Module
//!
//! Byte-bounded in-memory caches with LRU or LFU eviction.

mod entry;
mod lfu;
mod list;
mod lru;
mod stats;


use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

// Re-export public types
pub use entry::CacheEntry;
pub use lfu::LfuCache;
pub use list::{EntryArena, EntryId, OrderedIndex};
pub use lru::LruCache;
pub use stats::{CacheStats, MetricsRecorder, NoopRecorder, StatsCounter};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

// == Cache Trait ==
/// Operations every cache exposes to its callers.
///
/// Absent keys are a normal outcome (`Ok(None)` / `Ok(false)`); an `Err`
/// only ever signals broken internal bookkeeping or a failed replication
/// round trip.
pub trait Cache: Send + Sync {
    /// Looks up a key, updating recency or frequency on a hit.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites a key. Returns `true` when a new entry was created.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<bool>;

    /// Removes a key. Returns `true` when it was present.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Membership check without touching eviction order or metrics.
    fn has_key(&self, key: &str) -> bool;

    /// Number of resident entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently charged against the capacity.
    fn size(&self) -> u64;

    /// Capacity in bytes, fixed at construction.
    fn capacity(&self) -> u64;

    /// Copy of every key/value pair, taken under a read lock.
    fn entries(&self) -> Vec<(String, Vec<u8>)>;

    fn policy(&self) -> Policy;
}

// == Policy ==
/// Eviction discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Least recently used
    Lru,
    /// Least frequently used, ties broken by recency
    #[default]
    Lfu,
}

impl FromStr for Policy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Policy::Lru),
            "lfu" => Ok(Policy::Lfu),
            other => Err(CacheError::InvalidRequest(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Lru => write!(f, "lru"),
            Policy::Lfu => write!(f, "lfu"),
        }
    }
}

/// Builds an engine for `policy` reporting to `recorder`.
pub fn build_cache(
    policy: Policy,
    capacity: u64,
    recorder: Arc<dyn MetricsRecorder>,
) -> Arc<dyn Cache> {
    match policy {
        Policy::Lru => Arc::new(LruCache::new(capacity, recorder)),
        Policy::Lfu => Arc::new(LfuCache::new(capacity, recorder)),
    }
}
