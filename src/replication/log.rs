//! Replicated Log Module
//!
//! The seam between the cache and a consensus library, plus a single-process
//! sequencer implementing it.
//!
//! A consensus library only has to offer two things here: accept a proposed
//! mutation, and hand every committed mutation to each replica's state
//! machine exactly once, in log order. [`LocalLog`] does both inside one
//! process: it commits immediately and delivers to every attached replica
//! while holding its own lock, so deliveries can never interleave.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{CacheError, Result};
use crate::replication::{ApplyOutcome, CacheStateMachine, Command, LogEntry, MemorySink};

// == Replicated Log ==
/// Write path of a replicated cache.
pub trait ReplicatedLog: Send + Sync {
    /// Appends a mutation and waits for it to be applied locally.
    fn propose(&self, command: Command) -> Result<ApplyOutcome>;

    /// Index of the last committed entry.
    fn last_index(&self) -> u64;
}

struct LogState {
    term: u64,
    last_index: u64,
    /// Committed entries not yet compacted away
    retained: Vec<LogEntry>,
    /// Index of the first retained entry
    first_index: u64,
    /// Attached replicas. The first one answers proposals.
    replicas: Vec<Arc<CacheStateMachine>>,
}

// == Local Log ==
/// In-process sequencer standing in for a consensus cluster.
pub struct LocalLog {
    state: Mutex<LogState>,
}

impl LocalLog {
    pub fn new() -> Self {
        Self::with_term(1)
    }

    pub fn with_term(term: u64) -> Self {
        info!(term, "Initializing local replicated log");
        Self {
            state: Mutex::new(LogState {
                term,
                last_index: 0,
                retained: Vec::new(),
                first_index: 1,
                replicas: Vec::new(),
            }),
        }
    }

    // == Attach ==
    /// Adds a replica, first replaying any retained entries it has not yet
    /// applied.
    ///
    /// Fails if compaction already dropped entries the replica needs; such a
    /// replica has to [`join`](Self::join) from a snapshot instead.
    pub fn attach(&self, fsm: Arc<CacheStateMachine>) -> Result<()> {
        let mut state = self.state.lock();
        let applied = fsm.last_applied();
        if applied + 1 < state.first_index {
            return Err(CacheError::Internal(format!(
                "log compacted through index {}, replica is at {}",
                state.first_index - 1,
                applied
            )));
        }

        let mut replayed = 0;
        for entry in state.retained.iter().filter(|entry| entry.index > applied) {
            fsm.apply(entry)?;
            replayed += 1;
        }
        state.replicas.push(fsm);
        info!(
            replicas = state.replicas.len(),
            replayed, "replica attached to local log"
        );
        Ok(())
    }

    // == Join ==
    /// Bootstraps a new replica from a snapshot of the first attached replica,
    /// then attaches it. Returns the log index the snapshot covers.
    pub fn join(&self, fsm: Arc<CacheStateMachine>) -> Result<u64> {
        let mut state = self.state.lock();
        let leader = state
            .replicas
            .first()
            .cloned()
            .ok_or_else(|| CacheError::Internal("no replica to snapshot from".to_string()))?;

        let snapshot = leader.snapshot()?;
        let index = snapshot.index();
        let mut sink = MemorySink::new(format!("{}-{}", state.term, index));
        snapshot.persist(&mut sink)?;
        snapshot.release();

        fsm.restore(sink.reader()?)?;
        fsm.mark_applied(index);
        state.replicas.push(fsm);
        info!(index, replicas = state.replicas.len(), "replica joined from snapshot");
        Ok(index)
    }

    // == Compact ==
    /// Drops every retained entry. Returns how many were dropped.
    pub fn compact(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.retained.len();
        state.retained.clear();
        state.first_index = state.last_index + 1;
        debug!(dropped, first_index = state.first_index, "log compacted");
        dropped
    }

    /// Number of retained entries.
    pub fn retained(&self) -> usize {
        self.state.lock().retained.len()
    }

    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }
}

impl Default for LocalLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedLog for LocalLog {
    fn propose(&self, command: Command) -> Result<ApplyOutcome> {
        let data = command.encode()?;
        let mut state = self.state.lock();
        if state.replicas.is_empty() {
            return Err(CacheError::Internal(
                "no replica attached to the log".to_string(),
            ));
        }

        state.last_index += 1;
        let entry = LogEntry {
            index: state.last_index,
            term: state.term,
            data,
        };
        state.retained.push(entry.clone());

        // The entry is committed once retained: every replica gets it even
        // if an earlier one fails, and a failed replica is detached so it
        // cannot silently skip the entry. It has to `join` again.
        let mut outcome = None;
        let mut answer_error = None;
        let mut failed = Vec::new();
        for (position, replica) in state.replicas.iter().enumerate() {
            match replica.apply(&entry) {
                Ok(applied) if position == 0 => outcome = Some(applied),
                Ok(_) => {}
                Err(err) => {
                    error!(
                        index = entry.index,
                        replica = position,
                        error = %err,
                        "replica failed to apply, detaching it"
                    );
                    failed.push(position);
                    if position == 0 {
                        answer_error = Some(err);
                    }
                }
            }
        }
        for position in failed.into_iter().rev() {
            state.replicas.remove(position);
        }

        if let Some(err) = answer_error {
            return Err(err);
        }
        outcome.ok_or_else(|| CacheError::Internal("no replica answered".to_string()))
    }

    fn last_index(&self) -> u64 {
        self.state.lock().last_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, LfuCache, NoopRecorder};

    fn replica() -> Arc<CacheStateMachine> {
        let cache: Arc<dyn Cache> = Arc::new(LfuCache::new(1024, Arc::new(NoopRecorder)));
        Arc::new(CacheStateMachine::new(cache))
    }

    fn put(key: &str, value: &str) -> Command {
        Command::Put {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_propose_without_replica_fails() {
        let log = LocalLog::new();
        assert!(log.propose(put("a", "1")).is_err());
        assert_eq!(log.last_index(), 0);
    }

    #[test]
    fn test_propose_applies_to_all_replicas() {
        let log = LocalLog::new();
        let first = replica();
        let second = replica();
        log.attach(first.clone()).unwrap();
        log.attach(second.clone()).unwrap();

        let outcome = log.propose(put("a", "1")).unwrap();

        assert_eq!(outcome, ApplyOutcome::Put { created: true });
        assert_eq!(log.last_index(), 1);
        for fsm in [&first, &second] {
            assert_eq!(fsm.cache().get("a").unwrap(), Some(b"1".to_vec()));
            assert_eq!(fsm.last_applied(), 1);
        }
    }

    #[test]
    fn test_attach_replays_retained_entries() {
        let log = LocalLog::new();
        log.attach(replica()).unwrap();
        log.propose(put("a", "1")).unwrap();
        log.propose(put("b", "2")).unwrap();

        let late = replica();
        log.attach(late.clone()).unwrap();

        assert_eq!(late.last_applied(), 2);
        assert!(late.cache().has_key("a"));
        assert!(late.cache().has_key("b"));
        assert_eq!(log.replica_count(), 2);
    }

    #[test]
    fn test_compacted_log_requires_join() {
        let log = LocalLog::new();
        log.attach(replica()).unwrap();
        log.propose(put("a", "1")).unwrap();
        log.propose(put("b", "2")).unwrap();
        assert_eq!(log.compact(), 2);
        assert_eq!(log.retained(), 0);

        assert!(log.attach(replica()).is_err());

        let late = replica();
        let index = log.join(late.clone()).unwrap();
        assert_eq!(index, 2);
        assert_eq!(late.last_applied(), 2);
        assert_eq!(late.cache().get("b").unwrap(), Some(b"2".to_vec()));

        // joined replica keeps following the log
        log.propose(Command::Delete {
            key: "a".to_string(),
        })
        .unwrap();
        assert!(!late.cache().has_key("a"));
    }

    #[test]
    fn test_failed_replica_is_detached() {
        let log = LocalLog::new();
        let healthy = replica();
        let broken = replica();
        // ahead of the log, so the next entry is rejected as out of order
        broken.mark_applied(10);
        log.attach(healthy.clone()).unwrap();
        log.attach(broken.clone()).unwrap();

        let outcome = log.propose(put("a", "1")).unwrap();

        assert_eq!(outcome, ApplyOutcome::Put { created: true });
        assert_eq!(log.replica_count(), 1);
        assert!(!broken.cache().has_key("a"));

        // later entries no longer reach it, so it cannot skip one unnoticed
        log.propose(put("b", "2")).unwrap();
        assert!(!broken.cache().has_key("b"));
        assert_eq!(broken.last_applied(), 10);

        // a fresh join brings it back in step
        let index = log.join(broken.clone()).unwrap();
        assert_eq!(index, 2);
        log.propose(put("c", "3")).unwrap();
        for fsm in [&healthy, &broken] {
            assert_eq!(fsm.cache().len(), 3);
            assert_eq!(fsm.last_applied(), 3);
        }
    }

    #[test]
    fn test_failed_answering_replica_returns_error() {
        let log = LocalLog::new();
        let broken = replica();
        broken.mark_applied(10);
        let follower = replica();
        log.attach(broken.clone()).unwrap();
        log.attach(follower.clone()).unwrap();

        let result = log.propose(put("a", "1"));

        assert!(matches!(result, Err(CacheError::OutOfOrder { .. })));
        // committed entry still reached the follower, which now answers
        assert!(follower.cache().has_key("a"));
        assert_eq!(log.replica_count(), 1);
        assert_eq!(
            log.propose(put("a", "2")).unwrap(),
            ApplyOutcome::Put { created: false }
        );
    }

    #[test]
    fn test_join_without_leader_fails() {
        let log = LocalLog::new();
        assert!(log.join(replica()).is_err());
    }
}
