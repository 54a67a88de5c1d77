//! LRU Cache Module
//!
//! Byte-bounded cache that evicts the least recently used entry.
//!
//! A single [`OrderedIndex`] holds every entry:
//! - Front = Most recently used
//! - Back = Least recently used (next eviction victim)
//!
//! A key map points at the same arena handles, so lookup, touch and eviction
//! are all O(1).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::cache::{
    Cache, CacheEntry, EntryArena, EntryId, MetricsRecorder, OrderedIndex, Policy,
};
use crate::error::{CacheError, Result};

#[derive(Debug)]
struct LruState {
    keys: HashMap<String, EntryId>,
    arena: EntryArena,
    order: OrderedIndex,
    /// Sum of the charges of all resident entries
    size: u64,
}

impl LruState {
    fn new() -> Self {
        Self {
            keys: HashMap::new(),
            arena: EntryArena::new(),
            order: OrderedIndex::new(0),
            size: 0,
        }
    }

    fn entry(&self, id: EntryId) -> Result<&CacheEntry> {
        self.arena
            .get(id)
            .ok_or_else(|| CacheError::ForeignEntry(format!("key map holds stale handle {:?}", id)))
    }

    fn entry_mut(&mut self, id: EntryId) -> Result<&mut CacheEntry> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| CacheError::ForeignEntry(format!("key map holds stale handle {:?}", id)))
    }

    /// Marks an entry most recently used.
    fn touch(&mut self, id: EntryId) -> Result<()> {
        self.order.move_to_front(&mut self.arena, id)
    }

    /// Evicts from the tail until the size fits. Returns the evicted entries.
    fn evict_until_fits(&mut self, capacity: u64) -> Result<Vec<CacheEntry>> {
        let mut evicted = Vec::new();
        while self.size > capacity {
            let victim = self.order.pop_back(&mut self.arena)?;
            let entry = self.arena.remove(victim)?;
            self.size -= entry.charge;
            self.keys.remove(&entry.key);
            evicted.push(entry);
        }
        Ok(evicted)
    }

    fn unlink(&mut self, id: EntryId) -> Result<CacheEntry> {
        self.order.remove(&mut self.arena, id)?;
        let entry = self.arena.remove(id)?;
        self.size -= entry.charge;
        Ok(entry)
    }
}

// == LRU Cache ==
/// Least recently used cache bounded by total value bytes.
pub struct LruCache {
    state: RwLock<LruState>,
    capacity: u64,
    metrics: Arc<dyn MetricsRecorder>,
}

impl LruCache {
    // == Constructor ==
    /// Creates an empty cache holding at most `capacity` value bytes.
    pub fn new(capacity: u64, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            state: RwLock::new(LruState::new()),
            capacity,
            metrics,
        }
    }

    /// Keys in eviction order, next victim first.
    #[cfg(test)]
    pub(crate) fn eviction_order(&self) -> Vec<String> {
        let state = self.state.read();
        let mut keys: Vec<String> = state
            .order
            .iter(&state.arena)
            .filter_map(|id| state.arena.get(id).map(|entry| entry.key.clone()))
            .collect();
        keys.reverse();
        keys
    }
}

fn report(err: CacheError) -> CacheError {
    error!(error = %err, "lru bookkeeping diverged");
    err
}

impl Cache for LruCache {
    // == Get ==
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.write();
        let Some(&id) = state.keys.get(key) else {
            self.metrics.record_miss();
            return Ok(None);
        };

        state.touch(id).map_err(report)?;
        let value = state.entry(id).map_err(report)?.value.clone();
        self.metrics.record_hit();
        Ok(Some(value))
    }

    // == Put ==
    /// Inserts at the head, then evicts from the tail while over capacity.
    ///
    /// Overwriting an existing key does not change `size`: only the bytes
    /// charged when an entry was created count against the capacity.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        if self.capacity == 0 {
            return Ok(false);
        }

        let mut state = self.state.write();
        if let Some(&id) = state.keys.get(key) {
            state.touch(id).map_err(report)?;
            state.entry_mut(id).map_err(report)?.replace_value(value);
            self.metrics.record_hit();
            return Ok(false);
        }

        self.metrics.record_miss();
        let entry = CacheEntry::new(key, value);
        state.size += entry.charge;
        let id = state.arena.insert(entry);
        let LruState { arena, order, .. } = &mut *state;
        order.push_front(arena, id).map_err(report)?;
        state.keys.insert(key.to_string(), id);
        self.metrics.record_add();

        for evicted in state.evict_until_fits(self.capacity).map_err(report)? {
            self.metrics.record_delete();
            debug!(key = %evicted.key, bytes = evicted.charge, "lru evicted entry");
        }
        Ok(true)
    }

    // == Delete ==
    fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write();
        let Some(id) = state.keys.remove(key) else {
            return Ok(false);
        };
        state.unlink(id).map_err(report)?;
        self.metrics.record_delete();
        Ok(true)
    }

    fn has_key(&self, key: &str) -> bool {
        self.state.read().keys.contains_key(key)
    }

    fn len(&self) -> usize {
        self.state.read().keys.len()
    }

    fn size(&self) -> u64 {
        self.state.read().size
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn entries(&self) -> Vec<(String, Vec<u8>)> {
        let state = self.state.read();
        state
            .keys
            .iter()
            .filter_map(|(key, &id)| {
                state
                    .arena
                    .get(id)
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    fn policy(&self) -> Policy {
        Policy::Lru
    }
}
