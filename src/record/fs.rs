//! Filesystem record store.
//!
//! One file per key below the root; the file is a sequence of frames (see
//! [`crate::codec`]). Blocking I/O runs on the tokio blocking pool while
//! holding the key's lock, so a cancelled request still completes or rolls
//! back its single frame.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{remove_target, under_working_dir, working_dir, RecordStore, SCRATCH_PREFIX};
use crate::codec::{encode_frame, Codec, FrameReader};
use crate::glob::GlobQuery;
use crate::path::{record_key, KeyResolver};
use crate::payload::Payload;
use crate::{Error, Result};

/// Durable record store rooted at a directory.
///
/// # Example
///
/// ```rust,no_run
/// use ml_logger::record::{FsRecordStore, RecordStore};
/// use ml_logger::Payload;
///
/// # async fn example() -> ml_logger::Result<()> {
/// let store = FsRecordStore::new("/tmp/ml-logger");
/// store.append("exp", "loss.pkl", &Payload::Scalar(0.5)).await?;
/// store.overwrite("exp", "loss.pkl", &Payload::Scalar(0.1)).await?;
/// assert_eq!(store.read_all("exp", "loss.pkl").await?, vec![Payload::Scalar(0.1)]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FsRecordStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    resolver: KeyResolver,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    codec: Codec,
    sync_writes: bool,
}

impl FsRecordStore {
    /// Create a store rooted at `root`, writing uncompressed frames.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, Codec::Plain, false)
    }

    /// Create a store with an explicit frame codec and fsync policy.
    #[must_use]
    pub fn with_options(root: impl Into<PathBuf>, codec: Codec, sync_writes: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver: KeyResolver::new(root),
                locks: DashMap::new(),
                codec,
                sync_writes,
            }),
        }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.inner.resolver.root()
    }

    /// Number of keys with an in-flight operation.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.inner.locks.len()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::unavailable("storage task failed", e))?
    }
}

impl Inner {
    /// Run `f` while holding the lock for `path`.
    fn with_key_lock<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value());
        let result = {
            let _guard = lock_ignoring_poison(&lock);
            f()
        };
        drop(lock);
        // drop the table entry once nobody else holds or waits on it
        self.locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn append(&self, path: &Path, frame: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let start = file.metadata()?.len();

        let written = file.write_all(frame).and_then(|()| {
            if self.sync_writes {
                file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "append failed, rolling back");
            file.set_len(start)?;
            return Err(e.into());
        }

        let end = file.metadata()?.len();
        if end != start + frame.len() as u64 {
            return Err(Error::Conflict(format!(
                "{} grew by {} bytes during a {}-byte append",
                path.display(),
                end.saturating_sub(start),
                frame.len()
            )));
        }
        Ok(())
    }

    fn overwrite(&self, path: &Path, frame: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidKey(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(dir)?;

        let mut scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(dir)?;
        scratch.write_all(frame)?;
        if self.sync_writes {
            scratch.as_file().sync_data()?;
        }
        scratch.persist(path).map_err(|e| Error::from(e.error))?;
        Ok(())
    }

    fn read_all(&self, path: &Path, key: &str) -> Result<Vec<Payload>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("no record log at {key:?}")));
            }
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.is_dir() {
            return Err(Error::NotFound(format!("{key:?} is a directory, not a record log")));
        }
        FrameReader::new(BufReader::new(file)).collect()
    }
}

fn lock_ignoring_poison(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl RecordStore for FsRecordStore {
    async fn append(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        let logical = record_key(prefix, key)?;
        let path = self.inner.resolver.resolve(prefix, key)?;
        let frame = encode_frame(payload, self.inner.codec)?;
        debug!(key = %logical, kind = payload.type_name(), bytes = frame.len(), "append");

        self.blocking(move |inner| inner.with_key_lock(&path, || inner.append(&path, &frame)))
            .await
    }

    async fn overwrite(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        let logical = record_key(prefix, key)?;
        let path = self.inner.resolver.resolve(prefix, key)?;
        let frame = encode_frame(payload, self.inner.codec)?;
        debug!(key = %logical, kind = payload.type_name(), bytes = frame.len(), "overwrite");

        self.blocking(move |inner| inner.with_key_lock(&path, || inner.overwrite(&path, &frame)))
            .await
    }

    async fn read_all(&self, prefix: &str, key: &str) -> Result<Vec<Payload>> {
        let logical = record_key(prefix, key)?;
        let path = self.inner.resolver.resolve(prefix, key)?;

        let entries = self
            .blocking(move |inner| inner.with_key_lock(&path, || inner.read_all(&path, &logical)))
            .await?;
        debug!(prefix, key, entries = entries.len(), "read_all");
        Ok(entries)
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<()> {
        let target = remove_target(prefix, key)?;
        let path = self.inner.resolver.resolve_dir("", &target)?;
        debug!(target = %target, "remove");

        self.blocking(move |_| remove_path(&path)).await
    }

    async fn glob(&self, prefix: &str, pattern: &str, wd: &str) -> Result<Vec<String>> {
        let query = GlobQuery::new(pattern)?;
        let wd = working_dir(wd)?;
        let dir = self.inner.resolver.resolve_dir(prefix, &wd)?;

        let matches = self.blocking(move |_| query.walk(&dir)).await?;
        debug!(prefix, pattern, matches = matches.len(), "glob");
        Ok(matches
            .into_iter()
            .map(|relative| under_working_dir(&wd, relative))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> (tempfile::TempDir, FsRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_append_creates_parent_dirs() {
        let (dir, store) = store();
        store
            .append("exp/run", "deep/nested/x.pkl", &Payload::Integer(1))
            .await
            .unwrap();
        assert!(dir.path().join("exp/run/deep/nested/x.pkl").is_file());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.read_all("exp", "missing.pkl").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_directory_is_not_found() {
        let (_dir, store) = store();
        store.append("exp", "a/x.pkl", &Payload::Integer(1)).await.unwrap();
        assert!(matches!(
            store.read_all("exp", "a").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_scratch_files() {
        let (dir, store) = store();
        store.append("exp", "x.pkl", &Payload::Integer(1)).await.unwrap();
        store.overwrite("exp", "x.pkl", &Payload::Integer(2)).await.unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("exp"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.pkl".to_string()]);
    }

    #[tokio::test]
    async fn test_lock_table_is_drained() {
        let (_dir, store) = store();
        store.append("exp", "x.pkl", &Payload::Integer(1)).await.unwrap();
        store.read_all("exp", "x.pkl").await.unwrap();
        assert_eq!(store.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_held_key_does_not_block_other_keys() {
        let (dir, store) = store();
        let busy = dir.path().join("exp").join("busy.pkl");
        let lock = Arc::clone(store.inner.locks.entry(busy).or_default().value());
        let guard = lock_ignoring_poison(&lock);

        let other = tokio::time::timeout(
            Duration::from_secs(5),
            store.append("exp", "free.pkl", &Payload::Integer(1)),
        )
        .await;
        assert!(matches!(other, Ok(Ok(()))));

        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            store.append("exp", "busy.pkl", &Payload::Integer(1)),
        )
        .await;
        assert!(blocked.is_err(), "append on a held key should wait");

        drop(guard);
    }

    #[tokio::test]
    async fn test_remove_refuses_root() {
        let (_dir, store) = store();
        assert!(matches!(store.remove("", "").await, Err(Error::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_remove_cannot_reach_sibling_experiments() {
        let (dir, store) = store();
        store.append("exp/run-1", "x.pkl", &Payload::Integer(1)).await.unwrap();
        store.append("exp/run-2", "x.pkl", &Payload::Integer(2)).await.unwrap();

        for key in ["..", "../run-2", "a/../../run-2/x.pkl"] {
            let err = store.remove("exp/run-1", key).await.unwrap_err();
            assert!(matches!(err, Error::InvalidKey(_)), "key {key:?}");
        }
        assert!(dir.path().join("exp/run-2/x.pkl").is_file());
        assert_eq!(
            store.read_all("exp/run-2", "x.pkl").await.unwrap(),
            vec![Payload::Integer(2)]
        );
    }

    #[cfg(feature = "compression")]
    #[tokio::test]
    async fn test_compressed_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let blob = Payload::Blob(vec![7u8; 50_000]);

        for (codec, tag) in [(Codec::Lz4, 1u8), (Codec::Zstd, 2u8)] {
            let store = FsRecordStore::with_options(dir.path(), codec, false);
            let key = format!("{}.bin", codec.as_str());
            store.append("exp", &key, &blob).await.unwrap();
            store.append("exp", &key, &Payload::Integer(3)).await.unwrap();

            let bytes = fs::read(dir.path().join("exp").join(&key)).unwrap();
            assert_eq!(bytes[0], tag);
            assert!(bytes.len() < 50_000);

            // frames carry their codec, so any store reads them back
            let plain = FsRecordStore::new(dir.path());
            assert_eq!(
                plain.read_all("exp", &key).await.unwrap(),
                vec![blob.clone(), Payload::Integer(3)]
            );
        }
    }

    #[cfg(not(feature = "compression"))]
    #[tokio::test]
    async fn test_compressed_store_needs_feature() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::with_options(dir.path(), Codec::Lz4, false);
        let err = store.append("exp", "x.bin", &Payload::Integer(1)).await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!dir.path().join("exp/x.bin").exists());
    }

    #[test]
    fn test_remove_path_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_path(&dir.path().join("nope")).unwrap();
    }
}
