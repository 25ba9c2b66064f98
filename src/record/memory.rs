//! In-memory record store implementation using `DashMap`.
//!
//! Data is lost on process restart. Entries are kept as encoded frames so
//! the store enforces the same encoding rules as [`super::FsRecordStore`].

use dashmap::DashMap;
use tracing::debug;

use super::{remove_target, under_working_dir, working_dir, RecordStore};
use crate::codec::{encode_frame, Codec, FrameReader};
use crate::glob::GlobQuery;
use crate::path::{normalize, record_key};
use crate::payload::Payload;
use crate::{Error, Result};

/// In-memory record store using a concurrent hashmap.
///
/// Each key's log lives in its own map entry, so the shard lock held while
/// appending only ever covers one key's log.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    logs: DashMap<String, Vec<Vec<u8>>>,
}

impl MemoryRecordStore {
    /// Create a new in-memory record store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of record logs in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Clear all logs.
    pub fn clear(&self) {
        self.logs.clear();
    }
}

impl RecordStore for MemoryRecordStore {
    async fn append(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        let key = record_key(prefix, key)?;
        let frame = encode_frame(payload, Codec::Plain)?;
        debug!(key = %key, kind = payload.type_name(), "append");
        self.logs.entry(key).or_default().push(frame);
        Ok(())
    }

    async fn overwrite(&self, prefix: &str, key: &str, payload: &Payload) -> Result<()> {
        let key = record_key(prefix, key)?;
        let frame = encode_frame(payload, Codec::Plain)?;
        debug!(key = %key, kind = payload.type_name(), "overwrite");
        self.logs.insert(key, vec![frame]);
        Ok(())
    }

    async fn read_all(&self, prefix: &str, key: &str) -> Result<Vec<Payload>> {
        let key = record_key(prefix, key)?;
        let log = self
            .logs
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("no record log at {key:?}")))?;
        log.iter()
            .map(|frame| {
                FrameReader::new(frame.as_slice())
                    .next()
                    .unwrap_or_else(|| Err(Error::Conflict(format!("empty frame in {key:?}"))))
            })
            .collect()
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<()> {
        let target = remove_target(prefix, key)?;
        let nested = format!("{target}/");
        debug!(target = %target, "remove");
        self.logs
            .retain(|k, _| k != &target && !k.starts_with(&nested));
        Ok(())
    }

    async fn glob(&self, prefix: &str, pattern: &str, wd: &str) -> Result<Vec<String>> {
        let query = GlobQuery::new(pattern)?;
        let wd = working_dir(wd)?;
        let base = normalize(prefix, &wd)?;
        let base = if base.is_empty() {
            base
        } else {
            format!("{base}/")
        };

        let keys: Vec<String> = self
            .logs
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(base.as_str()).map(str::to_string))
            .collect();
        Ok(query
            .filter(keys.iter().map(String::as_str))
            .into_iter()
            .map(|relative| under_working_dir(&wd, relative))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_append_read() {
        let store = MemoryRecordStore::new();

        store.append("exp", "k.pkl", &Payload::Integer(1)).await.unwrap();
        store.append("exp", "k.pkl", &Payload::Integer(2)).await.unwrap();

        assert_eq!(
            store.read_all("exp", "k.pkl").await.unwrap(),
            vec![Payload::Integer(1), Payload::Integer(2)]
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_keys_are_normalized() {
        let store = MemoryRecordStore::new();

        store.append("exp", "./a//b.pkl", &Payload::Integer(1)).await.unwrap();
        assert_eq!(
            store.read_all("exp/a", "b.pkl").await.unwrap(),
            vec![Payload::Integer(1)]
        );
    }

    #[tokio::test]
    async fn test_memory_remove_prefix() {
        let store = MemoryRecordStore::new();

        store.append("exp", "a.pkl", &Payload::Integer(1)).await.unwrap();
        store.append("exp", "b/c.pkl", &Payload::Integer(1)).await.unwrap();
        store.append("expert", "a.pkl", &Payload::Integer(1)).await.unwrap();

        store.remove("exp", "").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.read_all("expert", "a.pkl").await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_rejects_non_finite() {
        let store = MemoryRecordStore::new();
        let err = store
            .append("exp", "k.pkl", &Payload::Scalar(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_clear() {
        let store = MemoryRecordStore::new();
        store.append("exp", "k.pkl", &Payload::Integer(1)).await.unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
