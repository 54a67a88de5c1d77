//! Snapshot Task
//!
//! Periodic persistence of the cache content, and the startup restore that
//! reads it back.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::replication::{CacheStateMachine, FileSnapshotSink};

/// Writes a snapshot of `fsm` to `path`, replacing any previous file.
///
/// Returns the number of entries written.
pub fn write_snapshot(fsm: &CacheStateMachine, path: &Path) -> Result<usize> {
    let snapshot = fsm.snapshot()?;
    let entries = snapshot.len();
    let mut sink = FileSnapshotSink::create(path)?;
    snapshot.persist(&mut sink)?;
    snapshot.release();
    Ok(entries)
}

/// Restores `fsm` from the snapshot at `path`.
///
/// Returns `Ok(None)` when no snapshot file exists yet.
pub fn load_snapshot(fsm: &CacheStateMachine, path: &Path) -> Result<Option<usize>> {
    if !path.exists() {
        debug!(path = %path.display(), "no snapshot to restore");
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    let restored = fsm.restore(reader)?;
    Ok(Some(restored))
}

/// Spawns a background task that snapshots the cache every
/// `interval_secs` seconds.
///
/// File I/O runs on the blocking pool. A failed snapshot is logged and the
/// next tick tries again.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_snapshot_task(
    fsm: Arc<CacheStateMachine>,
    path: PathBuf,
    interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(
            path = %path.display(),
            "Starting snapshot task with interval of {} seconds", interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let fsm = fsm.clone();
            let target = path.clone();
            let outcome =
                tokio::task::spawn_blocking(move || write_snapshot(&fsm, &target)).await;

            match outcome {
                Ok(Ok(entries)) => debug!("Snapshot written: {} entries", entries),
                Ok(Err(err)) => error!(error = %err, "Snapshot failed"),
                Err(err) => error!(error = %err, "Snapshot worker panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, LruCache, NoopRecorder};

    fn state_machine() -> Arc<CacheStateMachine> {
        let cache: Arc<dyn Cache> = Arc::new(LruCache::new(1024, Arc::new(NoopRecorder)));
        Arc::new(CacheStateMachine::new(cache))
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snapshot");

        let source = state_machine();
        source.cache().put("a", b"1".to_vec()).unwrap();
        source.cache().put("b", b"2".to_vec()).unwrap();
        assert_eq!(write_snapshot(&source, &path).unwrap(), 2);

        let target = state_machine();
        assert_eq!(load_snapshot(&target, &path).unwrap(), Some(2));
        assert_eq!(target.cache().get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fsm = state_machine();

        let loaded = load_snapshot(&fsm, &dir.path().join("absent")).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snapshot");
        std::fs::write(&path, b"garbage").unwrap();

        let fsm = state_machine();
        fsm.cache().put("keep", b"x".to_vec()).unwrap();

        assert!(load_snapshot(&fsm, &path).is_err());
        assert!(fsm.cache().has_key("keep"));
    }

    #[tokio::test]
    async fn test_snapshot_task_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snapshot");
        let fsm = state_machine();
        fsm.cache().put("k", b"v".to_vec()).unwrap();

        let handle = spawn_snapshot_task(fsm.clone(), path.clone(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(path.exists(), "Snapshot should have been written");

        handle.abort();
    }

    #[test]
    fn test_snapshot_task_can_be_aborted() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let handle = spawn_snapshot_task(state_machine(), dir.path().join("s"), 1);

            handle.abort();

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(handle.is_finished(), "Task should be finished after abort");
        });
    }
}
