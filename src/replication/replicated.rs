//! Replicated Cache Module
//!
//! Caller-facing cache whose writes go through the replicated log.

use std::sync::Arc;

use crate::cache::{Cache, Policy};
use crate::error::{CacheError, Result};
use crate::replication::{ApplyOutcome, CacheStateMachine, Command, ReplicatedLog};

// == Replicated Cache ==
/// Routes `put`/`delete` through a [`ReplicatedLog`] and serves reads from
/// the local replica, which may lag the log.
pub struct ReplicatedCache {
    local: Arc<CacheStateMachine>,
    log: Arc<dyn ReplicatedLog>,
}

impl ReplicatedCache {
    pub fn new(local: Arc<CacheStateMachine>, log: Arc<dyn ReplicatedLog>) -> Self {
        Self { local, log }
    }

    pub fn state_machine(&self) -> &Arc<CacheStateMachine> {
        &self.local
    }

    fn engine(&self) -> &Arc<dyn Cache> {
        self.local.cache()
    }
}

fn unexpected(outcome: ApplyOutcome) -> CacheError {
    CacheError::Internal(format!("unexpected apply outcome {:?}", outcome))
}

impl Cache for ReplicatedCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.engine().get(key)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let command = Command::Put {
            key: key.to_string(),
            value,
        };
        match self.log.propose(command)? {
            ApplyOutcome::Put { created } => Ok(created),
            other => Err(unexpected(other)),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let command = Command::Delete {
            key: key.to_string(),
        };
        match self.log.propose(command)? {
            ApplyOutcome::Delete { deleted } => Ok(deleted),
            other => Err(unexpected(other)),
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.engine().has_key(key)
    }

    fn len(&self) -> usize {
        self.engine().len()
    }

    fn size(&self) -> u64 {
        self.engine().size()
    }

    fn capacity(&self) -> u64 {
        self.engine().capacity()
    }

    fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.engine().entries()
    }

    fn policy(&self) -> Policy {
        self.engine().policy()
    }
}
