//! State Machine Module
//!
//! Adapts a cache engine to the apply / snapshot / restore contract a
//! consensus log drives.
//!
//! Only key/value content is replicated. Recency and frequency bookkeeping
//! depend on local reads, which never enter the log, so two replicas that
//! applied the same entries hold the same keys and values but may choose
//! different eviction victims later.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::replication::{ApplyOutcome, CacheSnapshot, Command, LogEntry};

// == Cache State Machine ==
/// Replicated state machine wrapping one cache engine.
pub struct CacheStateMachine {
    cache: Arc<dyn Cache>,
    /// Index of the last applied entry. Held for the whole of `apply`, which
    /// keeps delivery strictly sequential.
    last_applied: Mutex<u64>,
}

impl CacheStateMachine {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            last_applied: Mutex::new(0),
        }
    }

    /// The wrapped engine, for local reads.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn last_applied(&self) -> u64 {
        *self.last_applied.lock()
    }

    /// Records that everything up to `index` is reflected in the engine,
    /// e.g. after a restore.
    pub fn mark_applied(&self, index: u64) {
        *self.last_applied.lock() = index;
    }

    // == Apply ==
    /// Applies one committed entry to the engine.
    ///
    /// Entries must arrive with strictly increasing indices; anything else
    /// is rejected without touching the engine.
    pub fn apply(&self, entry: &LogEntry) -> Result<ApplyOutcome> {
        let mut last_applied = self.last_applied.lock();
        if entry.index <= *last_applied {
            return Err(CacheError::OutOfOrder {
                expected: *last_applied,
                got: entry.index,
            });
        }

        let outcome = match Command::decode(&entry.data)? {
            Command::Put { key, value } => ApplyOutcome::Put {
                created: self.cache.put(&key, value)?,
            },
            Command::Delete { key } => ApplyOutcome::Delete {
                deleted: self.cache.delete(&key)?,
            },
        };

        *last_applied = entry.index;
        debug!(index = entry.index, term = entry.term, ?outcome, "applied log entry");
        Ok(outcome)
    }

    // == Snapshot ==
    /// Copies the current key/value content. The engine read lock is held
    /// only while copying.
    pub fn snapshot(&self) -> Result<CacheSnapshot> {
        let last_applied = self.last_applied.lock();
        let store = self.cache.entries().into_iter().collect();
        Ok(CacheSnapshot::new(store, *last_applied))
    }

    // == Restore ==
    /// Replaces the engine content with the snapshot read from `reader`.
    ///
    /// The payload is decoded in full before the engine is touched, so a
    /// malformed snapshot leaves the current content intact. Keys missing
    /// from the snapshot are deleted; every snapshot pair is then written
    /// through an ordinary `put`, rebuilding eviction state from scratch.
    ///
    /// Each pair is charged at its current length. A value that grew through
    /// an overwrite was charged less on the source, so a target of equal
    /// capacity may evict it again.
    pub fn restore(&self, reader: impl Read) -> Result<usize> {
        let store = CacheSnapshot::decode(reader)?;
        let _sequenced = self.last_applied.lock();

        let stale: Vec<String> = {
            let keep: HashSet<&str> = store.keys().map(String::as_str).collect();
            self.cache
                .entries()
                .into_iter()
                .map(|(key, _)| key)
                .filter(|key| !keep.contains(key.as_str()))
                .collect()
        };
        for key in &stale {
            self.cache.delete(key)?;
        }

        let restored = store.len();
        for (key, value) in store {
            self.cache.put(&key, value)?;
        }

        info!(restored, dropped = stale.len(), "cache restored from snapshot");
        Ok(restored)
    }
}
