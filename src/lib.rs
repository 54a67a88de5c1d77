//! Quorum Cache - byte-bounded in-memory caches with optional replication
//!
//! Provides LRU and LFU caches bounded by total value bytes, a replicated
//! state machine adapter with snapshot/restore, and an HTTP front end.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod replication;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::{build_cache, Cache, LfuCache, LruCache, Policy, StatsCounter};
pub use config::Config;
pub use error::{CacheError, Result};
pub use replication::{CacheStateMachine, LocalLog, ReplicatedCache};
pub use tasks::{load_snapshot, spawn_snapshot_task, write_snapshot};
