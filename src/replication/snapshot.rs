//! Snapshot Module
//!
//! Point-in-time key/value copies of a cache and the sinks they are
//! persisted into.
//!
//! The payload is a flat JSON object mapping each key to its base64-encoded
//! value. Recency and frequency metadata are not part of it: a replica
//! restored from a snapshot rebuilds its eviction state from scratch.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

// == Snapshot Sink ==
/// Destination a snapshot is streamed into.
///
/// A sink is finished with exactly one of `close` (commit what was written)
/// or `cancel` (discard it).
pub trait SnapshotSink: Write + Send {
    /// Identifier of the snapshot being written.
    fn id(&self) -> &str;

    /// Commits the written bytes.
    fn close(&mut self) -> Result<()>;

    /// Discards whatever was written.
    fn cancel(&mut self) -> Result<()>;
}

// == Cache Snapshot ==
/// Key/value copy of a cache taken at log index `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    store: BTreeMap<String, Vec<u8>>,
    index: u64,
}

impl CacheSnapshot {
    pub fn new(store: BTreeMap<String, Vec<u8>>, index: u64) -> Self {
        Self { store, index }
    }

    /// Log index of the last mutation included.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.store.get(key).map(Vec::as_slice)
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoded: BTreeMap<&str, String> = self
            .store
            .iter()
            .map(|(key, value)| (key.as_str(), STANDARD.encode(value)))
            .collect();
        Ok(serde_json::to_vec(&encoded)?)
    }

    /// Decodes a payload, failing on anything that is not a flat
    /// key to base64 string object.
    pub fn decode(reader: impl Read) -> Result<BTreeMap<String, Vec<u8>>> {
        let encoded: BTreeMap<String, String> = serde_json::from_reader(reader)?;
        encoded
            .into_iter()
            .map(|(key, value)| {
                let bytes = STANDARD.decode(value)?;
                Ok((key, bytes))
            })
            .collect()
    }

    // == Persist ==
    /// Writes the payload to `sink` and closes it, cancelling the sink if
    /// any step fails.
    pub fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<()> {
        let result = self.encode().and_then(|bytes| {
            sink.write_all(&bytes)?;
            sink.flush()?;
            sink.close()
        });

        match &result {
            Ok(()) => debug!(
                id = sink.id(),
                entries = self.len(),
                index = self.index,
                "snapshot persisted"
            ),
            Err(err) => {
                warn!(id = sink.id(), error = %err, "snapshot persist failed, cancelling sink");
                if let Err(cancel_err) = sink.cancel() {
                    warn!(id = sink.id(), error = %cancel_err, "snapshot sink cancel failed");
                }
            }
        }
        result
    }

    /// Signals the snapshot is no longer needed.
    pub fn release(self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Open,
    Closed,
    Cancelled,
}

// == Memory Sink ==
/// In-memory sink, used to hand a snapshot straight to another replica.
#[derive(Debug)]
pub struct MemorySink {
    id: String,
    buf: Vec<u8>,
    state: SinkState,
}

impl MemorySink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            buf: Vec::new(),
            state: SinkState::Open,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SinkState::Closed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == SinkState::Cancelled
    }

    /// Reader over the committed bytes.
    pub fn reader(&self) -> Result<Cursor<&[u8]>> {
        if !self.is_closed() {
            return Err(CacheError::Internal(format!(
                "snapshot '{}' was not closed",
                self.id
            )));
        }
        Ok(Cursor::new(self.buf.as_slice()))
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != SinkState::Open {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "snapshot sink is finished",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for MemorySink {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&mut self) -> Result<()> {
        self.state = SinkState::Closed;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.buf.clear();
        self.state = SinkState::Cancelled;
        Ok(())
    }
}

// == File Sink ==
/// Sink that writes next to its target and renames into place on close, so
/// a reader of `path` never sees a half-written snapshot.
#[derive(Debug)]
pub struct FileSnapshotSink {
    id: String,
    path: PathBuf,
    tmp_path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl FileSnapshotSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let file = File::create(&tmp_path)?;
        Ok(Self {
            id: path.display().to_string(),
            path,
            tmp_path,
            file: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "snapshot sink is finished")
        })
    }
}

impl Write for FileSnapshotSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer()?.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&mut self) -> Result<()> {
        let writer = self.file.take().ok_or_else(|| {
            CacheError::Internal(format!("snapshot sink '{}' already finished", self.id))
        })?;
        let file = writer
            .into_inner()
            .map_err(|err| CacheError::Io(err.into_error()))?;
        file.sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.file = None;
        match fs::remove_file(&self.tmp_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CacheSnapshot {
        let mut store = BTreeMap::new();
        store.insert("a".to_string(), b"1".to_vec());
        store.insert("b".to_string(), vec![0, 159, 255]);
        CacheSnapshot::new(store, 7)
    }

    /// Sink whose writes always fail.
    struct BrokenSink {
        cancelled: bool,
        closed: bool,
    }

    impl Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SnapshotSink for BrokenSink {
        fn id(&self) -> &str {
            "broken"
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn cancel(&mut self) -> Result<()> {
            self.cancelled = true;
            Ok(())
        }
    }

    #[test]
    fn test_payload_is_flat_object() {
        let json: serde_json::Value = serde_json::from_slice(&sample().encode().unwrap()).unwrap();

        assert_eq!(json["a"], "MQ==");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_persist_to_memory_and_decode() {
        let snapshot = sample();
        let mut sink = MemorySink::new("mem");

        snapshot.persist(&mut sink).unwrap();
        assert!(sink.is_closed());

        let store = CacheSnapshot::decode(sink.reader().unwrap()).unwrap();
        assert_eq!(store.get("b").unwrap(), &vec![0, 159, 255]);
        assert_eq!(store.len(), 2);
        snapshot.release();
    }

    #[test]
    fn test_persist_failure_cancels_sink() {
        let mut sink = BrokenSink {
            cancelled: false,
            closed: false,
        };

        let result = sample().persist(&mut sink);

        assert!(matches!(result, Err(CacheError::Io(_))));
        assert!(sink.cancelled);
        assert!(!sink.closed);
    }

    #[test]
    fn test_unclosed_memory_sink_is_unreadable() {
        let sink = MemorySink::new("open");
        assert!(sink.reader().is_err());
    }

    #[test]
    fn test_cancelled_memory_sink_refuses_writes() {
        let mut sink = MemorySink::new("mem");
        sink.cancel().unwrap();

        assert!(sink.is_cancelled());
        assert!(sink.write_all(b"late").is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(CacheSnapshot::decode(&b"not json"[..]).is_err());
        assert!(CacheSnapshot::decode(&br#"["a", "b"]"#[..]).is_err());
        assert!(CacheSnapshot::decode(&br#"{"a": 1}"#[..]).is_err());
        assert!(CacheSnapshot::decode(&br#"{"a": "!!"}"#[..]).is_err());
    }

    #[test]
    fn test_file_sink_renames_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snapshot");

        let mut sink = FileSnapshotSink::create(&path).unwrap();
        sample().persist(&mut sink).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("cache.snapshot.tmp").exists());

        let store = CacheSnapshot::decode(File::open(&path).unwrap()).unwrap();
        assert_eq!(store.get("a").unwrap(), b"1");
    }

    #[test]
    fn test_file_sink_cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.snapshot");

        let mut sink = FileSnapshotSink::create(&path).unwrap();
        sink.write_all(b"{\"half").unwrap();
        sink.cancel().unwrap();

        assert!(!path.exists());
        assert!(!dir.path().join("cache.snapshot.tmp").exists());
    }
}
