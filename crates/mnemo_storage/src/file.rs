//! File-based storage backend for persistent storage.
//!
//! Indexes live in memory as in [`InMemoryBackend`](crate::InMemoryBackend);
//! durability comes from an append-only commit log. Each committed batch is
//! written as one frame:
//!
//! ```text
//! | magic "MNLG" (4) | version u16 | len u32 | batch payload (len) | crc32 u32 |
//! ```
//!
//! On `init` the log is replayed in order. A torn frame at the tail (from a
//! crash mid-write) is truncated. A frame whose header is unreadable, or a
//! damaged frame followed by further data, is reported as corruption.
//!
//! [`StorageBackend::checkpoint`] rewrites the log as a single frame holding
//! every live key, so replay no longer walks deleted keys.

use crate::backend::{IndexId, KeyOrdering, StorageBackend, StorageSnapshot};
use crate::batch::WriteBatch;
use crate::error::{StorageError, StorageResult};
use crate::table::VersionedTables;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File names within the store directory.
const LOG_FILE: &str = "datoms.log";
const CHECKPOINT_FILE: &str = "datoms.log.tmp";
const LOCK_FILE: &str = "LOCK";

/// Magic bytes identifying a commit frame.
pub const LOG_MAGIC: [u8; 4] = *b"MNLG";

/// Current commit log format version.
pub const LOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 4 + 2 + 4;
const TRAILER_SIZE: usize = 4;

struct OpenLog {
    path: PathBuf,
    file: File,
    len: u64,
    _lock_file: File,
}

/// A persistent backend backed by a directory holding a commit log.
///
/// # Durability
///
/// With `sync_on_commit` (the default) every commit calls
/// `File::sync_data()` before it becomes visible to snapshots.
///
/// # Example
///
/// ```no_run
/// use mnemo_storage::{memcmp, FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::new();
/// backend.declare_index(1, memcmp).unwrap();
/// backend.init(Some(Path::new("store"))).unwrap();
/// ```
pub struct FileBackend {
    tables: Arc<VersionedTables>,
    log: Mutex<Option<OpenLog>>,
    sync_on_commit: bool,
}

impl Default for FileBackend {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            log: Mutex::new(None),
            sync_on_commit: true,
        }
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

impl FileBackend {
    /// Creates a backend that is opened by [`StorageBackend::init`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether every commit is synced to disk.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Returns the path of the commit log once initialized.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.log.lock().as_ref().map(|log| log.path.clone())
    }

    fn open_log(dir: &Path) -> StorageResult<(File, File, PathBuf)> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let path = dir.join(LOG_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok((file, lock_file, path))
    }

    /// Replays every intact frame into the tables; returns the valid length.
    fn replay(&self, data: &[u8]) -> StorageResult<u64> {
        let mut offset = 0usize;
        let mut frames = 0usize;

        while offset < data.len() {
            match decode_frame(&data[offset..]) {
                Frame::Complete { batch, size } => {
                    self.tables.apply(&batch)?;
                    offset += size;
                    frames += 1;
                }
                Frame::Torn { reason } => {
                    warn!(offset, reason, "truncating torn commit log tail");
                    break;
                }
                Frame::Damaged { reason, size } if offset + size == data.len() => {
                    warn!(offset, reason = %reason, "truncating damaged final commit frame");
                    break;
                }
                Frame::Damaged { reason, .. } | Frame::Unreadable { reason } => {
                    return Err(StorageError::corrupted(format!(
                        "commit frame at offset {offset}: {reason}"
                    )));
                }
            }
        }

        debug!(frames, bytes = offset, "replayed commit log");
        Ok(offset as u64)
    }
}

enum Frame {
    Complete { batch: WriteBatch, size: usize },
    /// Shorter than its header claims; only possible at the tail.
    Torn { reason: &'static str },
    /// Header is sound but the payload is not.
    Damaged { reason: String, size: usize },
    /// Header cannot be trusted, so the frame size is unknown.
    Unreadable { reason: String },
}

fn encode_frame(batch: &WriteBatch) -> StorageResult<Vec<u8>> {
    let payload = batch.encode();
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::BatchTooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

fn decode_frame(data: &[u8]) -> Frame {
    let magic_len = data.len().min(LOG_MAGIC.len());
    if data[..magic_len] != LOG_MAGIC[..magic_len] {
        return Frame::Unreadable {
            reason: "bad magic".into(),
        };
    }
    if data.len() < HEADER_SIZE {
        return Frame::Torn {
            reason: "incomplete header",
        };
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != LOG_VERSION {
        return Frame::Unreadable {
            reason: format!("unsupported log version {version}"),
        };
    }
    let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let size = HEADER_SIZE + len + TRAILER_SIZE;
    if data.len() < size {
        return Frame::Torn {
            reason: "incomplete payload",
        };
    }

    let payload = &data[HEADER_SIZE..HEADER_SIZE + len];
    let stored = u32::from_le_bytes([
        data[size - 4],
        data[size - 3],
        data[size - 2],
        data[size - 1],
    ]);
    let actual = crc32fast::hash(payload);
    if stored != actual {
        return Frame::Damaged {
            reason: format!("checksum mismatch: expected {stored:08x}, got {actual:08x}"),
            size,
        };
    }

    match WriteBatch::decode(payload) {
        Ok(batch) => Frame::Complete { batch, size },
        Err(e) => Frame::Damaged {
            reason: e.to_string(),
            size,
        },
    }
}

impl StorageBackend for FileBackend {
    fn declare_index(&self, index: IndexId, ordering: KeyOrdering) -> StorageResult<()> {
        if self.log.lock().is_some() && !self.tables.is_declared(index) {
            return Err(StorageError::AlreadyInitialized);
        }
        self.tables.declare(index, ordering);
        Ok(())
    }

    fn init(&self, path: Option<&Path>) -> StorageResult<()> {
        let dir = path.ok_or(StorageError::MissingPath)?;
        let mut guard = self.log.lock();
        if guard.is_some() {
            return Err(StorageError::AlreadyInitialized);
        }

        let (mut file, lock_file, log_path) = Self::open_log(dir)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let len = self.replay(&data)?;
        if len < data.len() as u64 {
            file.set_len(len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(len))?;

        info!(path = %log_path.display(), bytes = len, "opened commit log");
        *guard = Some(OpenLog {
            path: log_path,
            file,
            len,
            _lock_file: lock_file,
        });
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        self.tables.validate(&batch)?;

        let mut guard = self.log.lock();
        let log = guard.as_mut().ok_or(StorageError::NotInitialized)?;

        let frame = encode_frame(&batch)?;
        let written = log.file.write_all(&frame).and_then(|()| {
            if self.sync_on_commit {
                log.file.sync_data()
            } else {
                log.file.flush()
            }
        });
        if let Err(e) = written {
            // Drop any partial frame so later appends stay readable.
            log.file.set_len(log.len)?;
            log.file.seek(SeekFrom::Start(log.len))?;
            return Err(e.into());
        }
        log.len += frame.len() as u64;

        self.tables.apply(&batch)?;
        Ok(())
    }

    /// Rewrites the commit log as one frame holding every live key.
    ///
    /// The new log is written beside the old one, synced, then renamed over
    /// it, so a crash leaves either the old or the new log in place.
    fn checkpoint(&self) -> StorageResult<()> {
        let mut guard = self.log.lock();
        let log = guard.as_mut().ok_or(StorageError::NotInitialized)?;
        let dir = log
            .path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(StorageError::MissingPath)?;

        let live = self.tables.live_batch();
        let frame = if live.is_empty() {
            Vec::new()
        } else {
            encode_frame(&live)?
        };

        let tmp_path = dir.join(CHECKPOINT_FILE);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &log.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&log.path)?;
        file.seek(SeekFrom::End(0))?;
        let before = log.len;
        log.file = file;
        log.len = frame.len() as u64;

        info!(keys = live.len(), before, after = log.len, "checkpointed commit log");
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
        if self.log.lock().is_none() {
            return Err(StorageError::NotInitialized);
        }
        Ok(self.tables.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memcmp;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn open(dir: &Path) -> FileBackend {
        let backend = FileBackend::new();
        backend.declare_index(1, memcmp).unwrap();
        backend.declare_index(2, memcmp).unwrap();
        backend.init(Some(dir)).unwrap();
        backend
    }

    fn keys(backend: &FileBackend, index: IndexId) -> Vec<Bytes> {
        backend
            .snapshot()
            .unwrap()
            .range(index, &[], &[0xFF])
            .unwrap()
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        assert!(dir.path().join(LOG_FILE).exists());
        assert!(keys(&backend, 1).is_empty());
    }

    #[test]
    fn file_init_requires_path() {
        let backend = FileBackend::new();
        assert!(matches!(backend.init(None), Err(StorageError::MissingPath)));
    }

    #[test]
    fn file_reopen_replays_commits() {
        let dir = tempdir().unwrap();
        {
            let backend = open(dir.path());
            let mut batch = backend.create_batch();
            batch.put(1, b"a".to_vec());
            batch.put(2, b"b".to_vec());
            backend.commit(batch).unwrap();

            let mut batch = backend.create_batch();
            batch.delete(1, b"a".to_vec());
            batch.put(1, b"c".to_vec());
            backend.commit(batch).unwrap();
        }

        let backend = open(dir.path());
        assert_eq!(keys(&backend, 1), vec![Bytes::from_static(b"c")]);
        assert_eq!(keys(&backend, 2), vec![Bytes::from_static(b"b")]);
        assert_eq!(backend.snapshot().unwrap().version(), 2);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = open(dir.path());

        let second = FileBackend::new();
        second.declare_index(1, memcmp).unwrap();
        assert!(matches!(
            second.init(Some(dir.path())),
            Err(StorageError::Locked)
        ));
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        {
            let backend = open(dir.path());
            let mut batch = backend.create_batch();
            batch.put(1, b"kept".to_vec());
            backend.commit(batch).unwrap();
        }

        let log_path = dir.path().join(LOG_FILE);
        let intact = fs::metadata(&log_path).unwrap().len();
        let mut batch = WriteBatch::new();
        batch.put(1, b"torn".to_vec());
        let frame = encode_frame(&batch).unwrap();
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&frame[..frame.len() - 3]).unwrap();
        drop(file);

        let backend = open(dir.path());
        assert_eq!(keys(&backend, 1), vec![Bytes::from_static(b"kept")]);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), intact);
    }

    #[test]
    fn file_damaged_middle_frame_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let backend = open(dir.path());
            for key in [b"a", b"b"] {
                let mut batch = backend.create_batch();
                batch.put(1, key.to_vec());
                backend.commit(batch).unwrap();
            }
        }

        let log_path = dir.path().join(LOG_FILE);
        let mut data = fs::read(&log_path).unwrap();
        data[HEADER_SIZE + 1] ^= 0xFF;
        fs::write(&log_path, data).unwrap();

        let backend = FileBackend::new();
        backend.declare_index(1, memcmp).unwrap();
        assert!(matches!(
            backend.init(Some(dir.path())),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn file_undeclared_index_writes_nothing() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let mut batch = backend.create_batch();
        batch.put(9, b"x".to_vec());
        assert!(backend.commit(batch).is_err());
        assert_eq!(fs::metadata(dir.path().join(LOG_FILE)).unwrap().len(), 0);
    }

    #[test]
    fn frame_checksum_detects_flip() {
        let mut batch = WriteBatch::new();
        batch.put(1, b"payload".to_vec());
        let mut frame = encode_frame(&batch).unwrap();
        assert!(matches!(decode_frame(&frame), Frame::Complete { .. }));

        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(decode_frame(&frame), Frame::Damaged { .. }));
    }

    fn commit_keys(backend: &FileBackend, keys: &[&[u8]]) {
        for key in keys {
            let mut batch = backend.create_batch();
            batch.put(1, key.to_vec());
            backend.commit(batch).unwrap();
        }
    }

    #[test]
    fn file_bad_magic_in_first_frame_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let backend = open(dir.path());
            commit_keys(&backend, &[b"a", b"b", b"c"]);
        }

        let log_path = dir.path().join(LOG_FILE);
        let mut data = fs::read(&log_path).unwrap();
        let before = data.len() as u64;
        data[0] ^= 0xFF;
        fs::write(&log_path, data).unwrap();

        let backend = FileBackend::new();
        backend.declare_index(1, memcmp).unwrap();
        assert!(matches!(
            backend.init(Some(dir.path())),
            Err(StorageError::Corrupted(_))
        ));
        assert_eq!(fs::metadata(&log_path).unwrap().len(), before);
    }

    #[test]
    fn file_bad_magic_in_last_frame_is_corruption() {
        let dir = tempdir().unwrap();
        let frame_len = {
            let backend = open(dir.path());
            commit_keys(&backend, &[b"a"]);
            let len = fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
            commit_keys(&backend, &[b"b"]);
            len as usize
        };

        let log_path = dir.path().join(LOG_FILE);
        let mut data = fs::read(&log_path).unwrap();
        data[frame_len + 2] ^= 0xFF;
        fs::write(&log_path, data).unwrap();

        let backend = FileBackend::new();
        backend.declare_index(1, memcmp).unwrap();
        assert!(matches!(
            backend.init(Some(dir.path())),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn file_bad_checksum_in_last_frame_is_truncated() {
        let dir = tempdir().unwrap();
        let frame_len = {
            let backend = open(dir.path());
            commit_keys(&backend, &[b"a"]);
            let len = fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
            commit_keys(&backend, &[b"b"]);
            len
        };

        let log_path = dir.path().join(LOG_FILE);
        let mut data = fs::read(&log_path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&log_path, data).unwrap();

        let backend = open(dir.path());
        assert_eq!(keys(&backend, 1), vec![Bytes::from_static(b"a")]);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), frame_len);
    }

    #[test]
    fn file_checkpoint_keeps_live_keys_only() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join(LOG_FILE);
        {
            let backend = open(dir.path());
            commit_keys(&backend, &[b"a", b"b", b"c"]);
            let mut batch = backend.create_batch();
            batch.delete(1, b"a".to_vec());
            batch.put(2, b"z".to_vec());
            backend.commit(batch).unwrap();

            let before = fs::metadata(&log_path).unwrap().len();
            backend.checkpoint().unwrap();
            assert!(fs::metadata(&log_path).unwrap().len() < before);
            assert!(!dir.path().join(CHECKPOINT_FILE).exists());

            commit_keys(&backend, &[b"d"]);
        }

        let backend = open(dir.path());
        assert_eq!(
            keys(&backend, 1),
            vec![
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
                Bytes::from_static(b"d")
            ]
        );
        assert_eq!(keys(&backend, 2), vec![Bytes::from_static(b"z")]);
    }

    #[test]
    fn file_checkpoint_of_empty_store() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        backend.checkpoint().unwrap();
        assert_eq!(fs::metadata(dir.path().join(LOG_FILE)).unwrap().len(), 0);
        assert!(matches!(
            FileBackend::new().checkpoint(),
            Err(StorageError::NotInitialized)
        ));
    }
}
