//! Change-tracking sets consumed from the external watcher collaborator.
//!
//! A [`WatchSet`] records which filesystem paths (and their content hashes at
//! read time) contributed to a build result. The core only unions and carries
//! these sets; deciding whether a recorded set is still up to date is the
//! watcher collaborator's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A set of watched paths with their recorded content hashes.
///
/// `None` records that the path was observed to be absent; a later appearance
/// is a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSet {
    files: BTreeMap<PathBuf, Option<String>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` with the hash it had when read (`None` = absent).
    /// Re-adding a path overwrites the recorded hash; the newest observation
    /// wins.
    pub fn add(&mut self, path: impl Into<PathBuf>, hash: Option<String>) {
        self.files.insert(path.into(), hash);
    }

    /// Unions `other` into `self`.
    pub fn merge(&mut self, other: &WatchSet) {
        for (path, hash) in &other.files {
            self.files.insert(path.clone(), hash.clone());
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn recorded_hash(&self, path: &Path) -> Option<&Option<String>> {
        self.files.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, Option<&str>)> {
        self.files
            .iter()
            .map(|(path, hash)| (path.as_path(), hash.as_deref()))
    }
}
