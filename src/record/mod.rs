//! Append-only record store
//!
//! Each key under an experiment prefix owns an ordered log of
//! [`Payload`] entries. The store provides:
//! - `append`: add one entry at the tail (non-idempotent)
//! - `overwrite`: atomically replace the whole log with one entry
//! - `read_all`: every entry in append order
//! - `remove`: delete a log, a directory of logs, or a whole prefix
//! - `glob`: list keys matching a shell-glob pattern
//!
//! Writers to the same key are serialized; writers to different keys never
//! contend.
//!
//! # Example
//!
//! ```rust
//! use ml_logger::record::{MemoryRecordStore, RecordStore};
//! use ml_logger::Payload;
//!
//! # async fn example() -> ml_logger::Result<()> {
//! let store = MemoryRecordStore::new();
//!
//! store.append("exp", "metrics/loss.pkl", &Payload::Scalar(0.9)).await?;
//! store.append("exp", "metrics/loss.pkl", &Payload::Scalar(0.5)).await?;
//! let losses = store.read_all("exp", "metrics/loss.pkl").await?;
//! assert_eq!(losses.len(), 2);
//!
//! store.remove("exp", "").await?;
//! # Ok(())
//! # }
//! ```

mod fs;
mod memory;

pub use fs::FsRecordStore;
pub use memory::MemoryRecordStore;

use std::future::Future;

use crate::path::{normalize, normalize_prefix};
use crate::payload::Payload;
use crate::{Error, Result};

/// File name prefix of in-flight overwrite files.
pub const SCRATCH_PREFIX: &str = ".mllog-tmp-";

/// Keyed append-only log storage.
pub trait RecordStore: Send + Sync {
    /// Append one entry to the tail of the key's log, creating it if absent.
    fn append(
        &self,
        prefix: &str,
        key: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replace the key's log with a single entry.
    ///
    /// Readers see either the old log or the new one, never a mix.
    fn overwrite(
        &self,
        prefix: &str,
        key: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read every entry in append order.
    ///
    /// Returns [`Error::NotFound`] if the key has no log.
    fn read_all(&self, prefix: &str, key: &str)
        -> impl Future<Output = Result<Vec<Payload>>> + Send;

    /// Delete the key's log. An empty key deletes everything under `prefix`.
    ///
    /// No-op if nothing exists. Unlike writes, a remove key may not climb
    /// out of its prefix with `..`.
    fn remove(&self, prefix: &str, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// List keys below `prefix/working_dir` matching `pattern`.
    ///
    /// Returned keys are relative to `prefix` and sorted.
    fn glob(
        &self,
        prefix: &str,
        pattern: &str,
        working_dir: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Like [`RecordStore::read_all`] but returns `default` for a missing key.
    fn read_all_or(
        &self,
        prefix: &str,
        key: &str,
        default: Vec<Payload>,
    ) -> impl Future<Output = Result<Vec<Payload>>> + Send {
        async move {
            match self.read_all(prefix, key).await {
                Err(Error::NotFound(_)) => Ok(default),
                other => other,
            }
        }
    }
}

/// Normalize a glob working directory, which must stay inside the prefix.
fn working_dir(wd: &str) -> Result<String> {
    normalize("", wd)
}

/// Turn a match relative to the working directory into a prefix-relative key.
fn under_working_dir(wd: &str, relative: String) -> String {
    if wd.is_empty() {
        relative
    } else {
        format!("{wd}/{relative}")
    }
}

/// Logical target of a remove. It must stay at or below the prefix, and
/// the whole root is never a target.
fn remove_target(prefix: &str, key: &str) -> Result<String> {
    let base = normalize_prefix(prefix)?;
    let target = normalize(prefix, key)?;
    let inside = base.is_empty() || target == base || target.starts_with(&format!("{base}/"));
    if !inside {
        return Err(Error::InvalidKey(format!(
            "{key:?} leaves prefix {prefix:?}; remove only deletes below its prefix"
        )));
    }
    if target.is_empty() {
        return Err(Error::InvalidKey(
            "refusing to remove the logging root; set a prefix".to_string(),
        ));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_working_dir() {
        assert_eq!(under_working_dir("", "x.pkl".into()), "x.pkl");
        assert_eq!(under_working_dir("a", "x.pkl".into()), "a/x.pkl");
    }

    #[test]
    fn test_working_dir_cannot_escape_prefix() {
        assert!(matches!(working_dir("../other"), Err(Error::InvalidKey(_))));
        assert_eq!(working_dir("./a/").unwrap(), "a");
    }

    #[test]
    fn test_remove_target_refuses_root() {
        assert!(matches!(remove_target("", ""), Err(Error::InvalidKey(_))));
        assert!(matches!(remove_target("a", ".."), Err(Error::InvalidKey(_))));
        assert_eq!(remove_target("exp", "").unwrap(), "exp");
        assert_eq!(remove_target("exp", "a/../b.pkl").unwrap(), "exp/b.pkl");
        assert_eq!(remove_target("", "exp/run-1").unwrap(), "exp/run-1");
    }

    #[test]
    fn test_remove_target_stays_in_prefix() {
        for key in ["..", "../run-2", "a/../../run-2/x.pkl"] {
            assert!(
                matches!(remove_target("exp/run-1", key), Err(Error::InvalidKey(_))),
                "key {key:?}"
            );
        }
        // a sibling whose name merely starts with the prefix is still outside
        assert!(matches!(remove_target("exp/run", "../run-10"), Err(Error::InvalidKey(_))));
    }
}
