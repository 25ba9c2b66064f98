//! Path/key resolution
//!
//! Maps `(prefix, key)` pairs onto logical keys (`a/b/c.pkl`) and onto
//! physical paths below a configured root. Both `/` and `\` are accepted
//! as separators; `.` and empty segments are dropped and `..` collapses the
//! previous segment. Climbing above the root is rejected.
//!
//! A leading `/` on a key does not anchor it at the filesystem root: keys
//! are always relative to their prefix.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Normalize a single path-like string into its segments.
fn push_segments<'a>(segments: &mut Vec<&'a str>, raw: &'a str, original: &str) -> Result<()> {
    if raw.contains('\0') {
        return Err(Error::InvalidKey(format!("{original:?} contains a NUL byte")));
    }
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::InvalidKey(format!(
                        "{original:?} escapes the logging root"
                    )));
                }
            }
            s => segments.push(s),
        }
    }
    Ok(())
}

/// Join `prefix` and `key` into a normalized logical key.
///
/// The result never starts or ends with `/` and never contains `.` or `..`
/// segments. It is empty only when both inputs normalize to nothing.
///
/// # Errors
/// Returns [`Error::InvalidKey`] if the key escapes the root or contains NUL.
pub fn normalize(prefix: &str, key: &str) -> Result<String> {
    let original = format!("{prefix}/{key}");
    let mut segments = Vec::new();
    push_segments(&mut segments, prefix, &original)?;
    push_segments(&mut segments, key, &original)?;
    Ok(segments.join("/"))
}

/// Normalize a prefix on its own (used to key signal mailboxes).
///
/// # Errors
/// Returns [`Error::InvalidKey`] if the prefix escapes the root.
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    normalize(prefix, "")
}

/// Normalize the logical key of a single record log.
///
/// Unlike [`normalize`], the key must name something below the prefix
/// directory rather than the prefix itself.
///
/// # Errors
/// Returns [`Error::InvalidKey`] if the key is empty after normalization
/// or escapes the root.
pub fn record_key(prefix: &str, key: &str) -> Result<String> {
    let logical = normalize(prefix, key)?;
    if key_is_empty(key) || logical.is_empty() || logical == normalize_prefix(prefix)? {
        return Err(Error::InvalidKey(format!(
            "empty key under prefix {prefix:?}"
        )));
    }
    Ok(logical)
}

/// Resolves logical keys to physical locations below a root directory.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    root: PathBuf,
}

impl KeyResolver {
    /// Create a resolver rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the location of a single record log.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] if the key is empty after normalization
    /// or escapes the root.
    pub fn resolve(&self, prefix: &str, key: &str) -> Result<PathBuf> {
        Ok(self.to_physical(&record_key(prefix, key)?))
    }

    /// Resolve a directory location; an empty key denotes the prefix itself.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] if the location escapes the root.
    pub fn resolve_dir(&self, prefix: &str, key: &str) -> Result<PathBuf> {
        let logical = normalize(prefix, key)?;
        Ok(self.to_physical(&logical))
    }

    fn to_physical(&self, logical: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(logical.split('/').filter(|s| !s.is_empty()));
        path
    }
}

/// Whether the key names nothing once `.` and separators are stripped.
fn key_is_empty(key: &str) -> bool {
    key.split(['/', '\\']).all(|s| s.is_empty() || s == ".")
}
