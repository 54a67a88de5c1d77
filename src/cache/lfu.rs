//! LFU Cache Module
//!
//! Byte-bounded cache that evicts the least frequently used entry, breaking
//! ties by recency.
//!
//! Entries with the same access count share a frequency bucket (an
//! [`OrderedIndex`] tagged with that count). A touch moves the entry from
//! bucket `f` to the head of bucket `f + 1`; eviction pops the tail of the
//! bucket at `min_frequency`, which is the least recently touched entry among
//! the least frequently used ones. Empty buckets are dropped immediately, and
//! `min_frequency` moves to the lowest populated bucket as buckets empty.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::cache::{
    Cache, CacheEntry, EntryArena, EntryId, MetricsRecorder, OrderedIndex, Policy,
};
use crate::error::{CacheError, Result};

#[derive(Debug)]
struct LfuState {
    keys: HashMap<String, EntryId>,
    arena: EntryArena,
    buckets: HashMap<u64, OrderedIndex>,
    min_frequency: u64,
    size: u64,
}

impl LfuState {
    fn new() -> Self {
        Self {
            keys: HashMap::new(),
            arena: EntryArena::new(),
            buckets: HashMap::new(),
            min_frequency: 0,
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

    /// Moves `min_frequency` up to the lowest populated bucket, or to 0
    /// when the cache is empty.
    ///
    /// Steps to `min + 1` when that bucket exists, which is the usual case
    /// since touches move entries one frequency at a time. Only a gap in
    /// the frequencies falls back to scanning the bucket keys.
    fn advance_min_frequency(&mut self) {
        if self.buckets.is_empty() {
            self.min_frequency = 0;
        } else if !self.buckets.contains_key(&self.min_frequency) {
            let next = self.min_frequency + 1;
            self.min_frequency = if self.buckets.contains_key(&next) {
                next
            } else {
                self.buckets.keys().copied().min().unwrap_or(0)
            };
        }
    }

    /// Unlinks an entry from its frequency bucket, dropping the bucket if
    /// that left it empty.
    fn detach(&mut self, id: EntryId) -> Result<u64> {
        let frequency = self.entry(id)?.frequency;
        let LfuState { arena, buckets, .. } = self;
        let bucket = buckets
            .get_mut(&frequency)
            .ok_or(CacheError::EmptyStructure("no bucket for resident entry frequency"))?;
        bucket.remove(arena, id)?;
        if bucket.is_empty() {
            buckets.remove(&frequency);
        }
        Ok(frequency)
    }

    /// Links an entry at the head of the bucket matching its frequency.
    fn attach(&mut self, id: EntryId) -> Result<()> {
        let frequency = self.entry(id)?.frequency;
        let LfuState { arena, buckets, .. } = self;
        buckets
            .entry(frequency)
            .or_insert_with(|| OrderedIndex::new(frequency))
            .push_front(arena, id)
    }

    /// Counts one more access: bucket `f` to bucket `f + 1`.
    fn touch(&mut self, id: EntryId) -> Result<()> {
        let old = self.detach(id)?;
        self.entry_mut(id)?.frequency += 1;
        self.attach(id)?;
        if self.min_frequency == old && !self.buckets.contains_key(&old) {
            self.min_frequency = old + 1;
        }
        Ok(())
    }

    /// Evicts from the minimum-frequency bucket until the size fits or
    /// nothing is left. Returns the evicted entries.
    fn evict_until_fits(&mut self, capacity: u64) -> Result<Vec<CacheEntry>> {
        let mut evicted = Vec::new();
        while self.size > capacity && !self.keys.is_empty() {
            if self.buckets.is_empty() {
                return Err(CacheError::EmptyStructure(
                    "frequency buckets empty while keys are resident",
                ));
            }

            let min = self.min_frequency;
            let popped = match self.buckets.get_mut(&min) {
                Some(bucket) if !bucket.is_empty() => Some(bucket.pop_back(&mut self.arena)?),
                _ => None,
            };
            let Some(victim) = popped else {
                // absent or empty minimum bucket
                self.buckets.remove(&min);
                self.advance_min_frequency();
                continue;
            };
            if self.buckets.get(&min).is_some_and(OrderedIndex::is_empty) {
                self.buckets.remove(&min);
                self.advance_min_frequency();
            }

            let entry = self.arena.remove(victim)?;
            self.size -= entry.charge;
            self.keys.remove(&entry.key);
            evicted.push(entry);
        }
        Ok(evicted)
    }
}

// == LFU Cache ==
/// Least frequently used cache bounded by total value bytes.
pub struct LfuCache {
    state: RwLock<LfuState>,
    capacity: u64,
    metrics: Arc<dyn MetricsRecorder>,
}

impl LfuCache {
    // == Constructor ==
    /// Creates an empty cache holding at most `capacity` value bytes.
    pub fn new(capacity: u64, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            state: RwLock::new(LfuState::new()),
            capacity,
            metrics,
        }
    }

    #[cfg(test)]
    pub(crate) fn frequency(&self, key: &str) -> Option<u64> {
        let state = self.state.read();
        let id = *state.keys.get(key)?;
        state.arena.get(id).map(|entry| entry.frequency)
    }

    #[cfg(test)]
    pub(crate) fn min_frequency(&self) -> u64 {
        self.state.read().min_frequency
    }

    /// Keys in eviction order, next victim first.
    #[cfg(test)]
    pub(crate) fn eviction_order(&self) -> Vec<String> {
        let state = self.state.read();
        let mut frequencies: Vec<u64> = state.buckets.keys().copied().collect();
        frequencies.sort_unstable();

        let mut keys = Vec::new();
        for frequency in frequencies {
            let mut bucket: Vec<String> = state.buckets[&frequency]
                .iter(&state.arena)
                .filter_map(|id| state.arena.get(id).map(|entry| entry.key.clone()))
                .collect();
            bucket.reverse();
            keys.extend(bucket);
        }
        keys
    }

    /// Panics if the key map, buckets, size and minimum frequency disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.state.read();
        let mut linked = 0;
        for (frequency, bucket) in &state.buckets {
            assert!(!bucket.is_empty(), "empty bucket {} retained", frequency);
            for id in bucket.iter(&state.arena) {
                let entry = state.arena.get(id).expect("bucket holds stale handle");
                assert_eq!(entry.frequency, *frequency);
                assert_eq!(state.keys.get(&entry.key), Some(&id));
                linked += 1;
            }
        }
        assert_eq!(linked, state.keys.len());
        assert_eq!(state.arena.len(), state.keys.len());

        let charged: u64 = state
            .keys
            .values()
            .filter_map(|id| state.arena.get(*id))
            .map(|entry| entry.charge)
            .sum();
        assert_eq!(charged, state.size);

        if let Some(min) = state.buckets.keys().min() {
            assert_eq!(*min, state.min_frequency);
        }
    }
}

fn report(err: CacheError) -> CacheError {
    error!(error = %err, "lfu bookkeeping diverged");
    err
}

impl Cache for LfuCache {
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
    /// Touches and overwrites an existing key, or evicts down to capacity
    /// and inserts a new entry at frequency 1.
    ///
    /// A zero capacity disables the cache: nothing is stored and `false` is
    /// returned. A new value longer than the whole capacity drains the cache
    /// and is then discarded itself, mirroring the LRU self-eviction.
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

        for evicted in state.evict_until_fits(self.capacity).map_err(report)? {
            self.metrics.record_delete();
            debug!(
                key = %evicted.key,
                frequency = evicted.frequency,
                bytes = evicted.charge,
                "lfu evicted entry"
            );
        }

        self.metrics.record_add();
        if state.size > self.capacity {
            state.size -= entry.charge;
            self.metrics.record_delete();
            debug!(key = %entry.key, bytes = entry.charge, "lfu value exceeds capacity");
            return Ok(true);
        }

        let id = state.arena.insert(entry);
        state.attach(id).map_err(report)?;
        state.keys.insert(key.to_string(), id);
        state.min_frequency = 1;
        Ok(true)
    }

    // == Delete ==
    /// Removes the entry from both the key map and its frequency bucket.
    fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write();
        let Some(id) = state.keys.remove(key) else {
            return Ok(false);
        };

        let frequency = state.detach(id).map_err(report)?;
        if frequency == state.min_frequency {
            state.advance_min_frequency();
        }
        let entry = state.arena.remove(id).map_err(report)?;
        state.size -= entry.charge;
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
        Policy::Lfu
    }
}
