//! Per-output-tree path bookkeeping.
//!
//! The ledger records which relative paths in a build tree are files and
//! which are directories. It is pure data: the [`Builder`](crate::builder)
//! consults and updates it around every disk operation, and it backs the
//! sanitization/uniqueness logic for generated filenames. Paths are
//! canonical relative paths: forward slashes, no trailing slash.

use std::collections::HashMap;

use crate::error::{BuildError, BuildResult};

/// What a reserved path is used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Ownership map from relative path to file/directory kind.
#[derive(Debug, Clone)]
pub struct PathLedger {
    entries: HashMap<String, EntryKind>,
}

impl PathLedger {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // The tree root is always a directory.
        entries.insert(String::new(), EntryKind::Directory);
        entries.insert(".".to_string(), EntryKind::Directory);
        Self { entries }
    }

    pub fn get(&self, rel_path: &str) -> Option<EntryKind> {
        self.entries.get(rel_path).copied()
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.entries.contains_key(rel_path)
    }

    pub fn is_file(&self, rel_path: &str) -> bool {
        self.get(rel_path) == Some(EntryKind::File)
    }

    pub fn is_directory(&self, rel_path: &str) -> bool {
        self.get(rel_path) == Some(EntryKind::Directory)
    }

    pub fn mark_file(&mut self, rel_path: impl Into<String>) {
        self.entries.insert(rel_path.into(), EntryKind::File);
    }

    pub fn mark_directory(&mut self, rel_path: impl Into<String>) {
        self.entries.insert(rel_path.into(), EntryKind::Directory);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EntryKind)> {
        self.entries.iter().map(|(path, kind)| (path.as_str(), *kind))
    }

    /// Number of reserved paths, not counting the implicit root entries.
    pub fn len(&self) -> usize {
        self.entries.len().saturating_sub(2)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sanitizes `rel_path` against this ledger.
    ///
    /// Per component: all-dots segments (`.`, `..`) are rejected as
    /// directory traversal, and characters outside `[a-zA-Z0-9._:@#-]` are
    /// replaced with `_`. The final component must additionally be unique: a
    /// numeric suffix is inserted before the extension until the candidate
    /// path is not already reserved in a conflicting way. Intermediate
    /// components may coincide with existing directories.
    pub fn sanitize(&self, rel_path: &str, is_directory: bool) -> BuildResult<String> {
        let parts: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty()).collect();
        let mut out: Vec<String> = Vec::with_capacity(parts.len());

        for (i, raw) in parts.iter().enumerate() {
            let last = i == parts.len() - 1;
            let should_be_file = last && !is_directory;
            let must_be_unique = last;

            if raw.chars().all(|c| c == '.') {
                return Err(BuildError::ForbiddenSegment {
                    segment: (*raw).to_string(),
                });
            }

            let mut part: String = raw
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-' | '@' | '#') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();

            // Pull the extension off a final file component so uniqueness
            // suffixes land before it: report -> report1.txt, not report.txt1.
            let mut ext = String::new();
            if should_be_file {
                if let Some(dot) = part.rfind('.') {
                    ext = part.split_off(dot);
                }
            }

            let mut suffix = 0u64;
            let name = loop {
                let name = if suffix == 0 {
                    format!("{part}{ext}")
                } else {
                    format!("{part}{suffix}{ext}")
                };
                let candidate = if out.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", out.join("/"), name)
                };

                if !candidate.is_empty() {
                    match self.get(&candidate) {
                        // Never heard of it: unique enough.
                        None => break name,
                        // A non-final component may reuse an existing
                        // directory.
                        Some(EntryKind::Directory) if !must_be_unique => break name,
                        _ => {}
                    }
                }

                suffix += 1;
            };

            out.push(name);
        }

        Ok(out.join("/"))
    }
}

impl Default for PathLedger {
    fn default() -> Self {
        Self::new()
    }
}
