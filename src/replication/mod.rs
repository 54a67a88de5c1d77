//! Replication Module
//!
//! Runs a cache engine as a replicated state machine: committed log entries
//! are applied in order, and snapshots bootstrap lagging or new replicas.

mod command;
mod fsm;
mod log;
mod replicated;
mod snapshot;

pub use command::{ApplyOutcome, Command, LogEntry};
pub use fsm::CacheStateMachine;
pub use log::{LocalLog, ReplicatedLog};
pub use replicated::ReplicatedCache;
pub use snapshot::{CacheSnapshot, FileSnapshotSink, MemorySink, SnapshotSink};
