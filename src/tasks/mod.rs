//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Snapshot: Persists the cache content to disk at configured intervals

mod snapshot;

pub use snapshot::{load_snapshot, spawn_snapshot_task, write_snapshot};
