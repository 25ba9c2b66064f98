//! Glob query engine
//!
//! Patterns use shell-glob syntax, matched against `/`-separated paths
//! relative to the working directory:
//!
//! | Syntax   | Matches                                   |
//! |----------|-------------------------------------------|
//! | `*`      | any characters within one path segment    |
//! | `?`      | exactly one character (never `/`)         |
//! | `**`     | any number of segments, including zero    |
//! | `[abc]`  | one character from the class              |
//! | `{a,b}`  | either alternative                        |
//!
//! A pattern without `**` is non-recursive: the walk stops at the depth of
//! the pattern's own segment count. A pattern with `**` walks the whole
//! subtree. Matches include directories as well as record logs.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use crate::{Error, Result};

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobQuery {
    pattern: String,
    matcher: GlobMatcher,
    depth: Option<usize>,
}

impl GlobQuery {
    /// Compile a pattern.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] if the pattern is empty, malformed, or
    /// contains a `..` segment.
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches("./").trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidKey("empty glob pattern".to_string()));
        }
        if trimmed.split('/').any(|s| s == "..") {
            return Err(Error::InvalidKey(format!(
                "glob pattern {pattern:?} may not contain `..`"
            )));
        }

        let matcher = GlobBuilder::new(trimmed)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|e| Error::InvalidKey(format!("malformed glob pattern {pattern:?}: {e}")))?
            .compile_matcher();

        let depth = if trimmed.contains("**") {
            None
        } else {
            Some(trimmed.split('/').filter(|s| !s.is_empty()).count())
        };

        Ok(Self {
            pattern: trimmed.to_string(),
            matcher,
            depth,
        })
    }

    /// The pattern as compiled.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern descends through arbitrary depth.
    #[must_use]
    pub const fn is_recursive(&self) -> bool {
        self.depth.is_none()
    }

    /// Test a `/`-separated relative path.
    #[must_use]
    pub fn is_match(&self, relative: &str) -> bool {
        self.matcher.is_match(relative)
    }

    /// Walk `dir` and return every matching path relative to it.
    ///
    /// A missing directory yields an empty set.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the directory cannot be read.
    pub fn walk(&self, dir: &Path) -> Result<BTreeSet<String>> {
        let mut matches = BTreeSet::new();
        if !dir.is_dir() {
            return Ok(matches);
        }

        let mut walker = WalkDir::new(dir).min_depth(1).follow_links(false);
        if let Some(depth) = self.depth {
            walker = walker.max_depth(depth);
        }

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let err = io::Error::from(e);
                    // entries removed while walking are simply absent
                    if err.kind() == io::ErrorKind::NotFound {
                        continue;
                    }
                    return Err(err.into());
                }
            };
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if is_scratch_file(&relative) {
                continue;
            }
            if self.is_match(&relative) {
                matches.insert(relative);
            }
        }
        Ok(matches)
    }

    /// Match against a set of logical keys, all relative to the working
    /// directory. Parent directories implied by the keys are candidates too.
    #[must_use]
    pub fn filter<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut matches = BTreeSet::new();
        for key in keys {
            let mut end = 0;
            loop {
                let next = key[end..].find('/').map(|i| end + i);
                let candidate = next.map_or(key, |i| &key[..i]);
                if self.depth.map_or(true, |d| candidate.split('/').count() <= d)
                    && self.is_match(candidate)
                {
                    matches.insert(candidate.to_string());
                }
                match next {
                    Some(i) => end = i + 1,
                    None => break,
                }
            }
        }
        matches
    }
}

/// Temporary files created by an in-flight overwrite are never reported.
pub(crate) fn is_scratch_file(relative: &str) -> bool {
    relative
        .rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(crate::record::SCRATCH_PREFIX))
}
