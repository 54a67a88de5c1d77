//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, adds and deletes.
//!
//! Engines receive a [`MetricsRecorder`] at construction instead of touching
//! global counters, so every instance (and every test) can observe its own
//! numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

// == Metrics Recorder ==
/// Side channel the engines report operation outcomes to.
pub trait MetricsRecorder: Send + Sync {
    /// A lookup (or update of an existing key) found its entry.
    fn record_hit(&self);
    /// A lookup (or insert of a new key) found nothing.
    fn record_miss(&self);
    /// A new entry was created.
    fn record_add(&self);
    /// An entry was removed, by eviction or explicit delete.
    fn record_delete(&self);
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_hit(&self) {}
    fn record_miss(&self) {}
    fn record_add(&self) {}
    fn record_delete(&self) {}
}

// == Stats Counter ==
/// Monotonic atomic counters, reset only when the process restarts.
#[derive(Debug, Default)]
pub struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    adds: AtomicU64,
    deletes: AtomicU64,
}

impl StatsCounter {
    /// Creates a shared counter with everything at zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            adds: self.adds.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

impl MetricsRecorder for StatsCounter {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_add(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }
}

// == Cache Stats ==
/// Snapshot of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals
    pub misses: u64,
    /// Number of entries created
    pub adds: u64,
    /// Number of entries evicted or deleted
    pub deletes: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_new() {
        let stats = StatsCounter::new().snapshot();
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = StatsCounter::new().snapshot();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counter = StatsCounter::new();
        counter.record_hit();
        counter.record_miss();
        assert_eq!(counter.snapshot().hit_rate(), 0.5);
    }

    #[test]
    fn test_record_add_and_delete() {
        let counter = StatsCounter::new();
        counter.record_add();
        counter.record_add();
        counter.record_delete();

        let stats = counter.snapshot();
        assert_eq!(stats.adds, 2);
        assert_eq!(stats.deletes, 1);
    }

    #[test]
    fn test_counters_shared_across_threads() {
        let counter = StatsCounter::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.record_hit();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.snapshot().hits, 400);
    }
}
