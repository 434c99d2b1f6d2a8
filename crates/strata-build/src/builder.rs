//! Atomic, incremental construction of output directory trees.
//!
//! A [`Builder`] assembles a directory tree and moves it into place without
//! ever leaving the final path in a partially-written state. By default the
//! whole tree is built from scratch under a temporary name next to the output
//! path and renamed over it on completion. For fast rebuilds a builder can be
//! given the [`PreviousBuild`] snapshot returned by the last successful
//! `complete()`: on platforms where replacing files out from under open
//! handles is safe, the working tree is then the previous output tree itself
//! and only changed entries are rewritten.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use strata_package::WatchSet;

use crate::error::{BuildError, BuildResult};
use crate::hash::hash_bytes;
use crate::ledger::{EntryKind, PathLedger};

/// Whether this platform can safely rewrite files under an open handle
/// (processes retain open files by inode, not path).
pub const IN_PLACE_SUPPORTED: bool = cfg!(unix);

static BUILD_NONCE: AtomicU64 = AtomicU64::new(0);

fn next_nonce() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        BUILD_NONCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Returns the canonical parent of a canonical relative path ("" at the root).
fn parent_of(rel_path: &str) -> &str {
    rel_path
        .rfind('/')
        .map(|i| &rel_path[..i])
        .unwrap_or("")
}

/// Joins two canonical relative paths.
fn join_rel(prefix: &str, rel_path: &str) -> String {
    if prefix.is_empty() {
        rel_path.to_string()
    } else if rel_path.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{rel_path}")
    }
}

/// Snapshot of a completed build, used to reuse its on-disk tree.
///
/// It is assumed the build completed successfully and the tree at
/// `output_path` still has exactly the layout described by the ledger, with
/// content hashes matching `written_hashes`.
#[derive(Debug, Clone)]
pub struct PreviousBuild {
    output_path: PathBuf,
    ledger: PathLedger,
    written_hashes: HashMap<String, String>,
}

impl PreviousBuild {
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Options for constructing a [`Builder`].
#[derive(Debug)]
pub struct BuilderOptions {
    pub output_path: PathBuf,
    /// Snapshot of the previous build of the same output path, if any.
    pub previous: Option<PreviousBuild>,
    /// Allow in-place reuse of the previous tree. Defaults to whether the
    /// platform supports it; hosts may force fresh builds.
    pub in_place: bool,
}

impl BuilderOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            previous: None,
            in_place: IN_PLACE_SUPPORTED,
        }
    }

    pub fn previous(mut self, previous: PreviousBuild) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn in_place(mut self, in_place: bool) -> Self {
        self.in_place = in_place;
        self
    }
}

/// Options for a single [`Builder::write`] call. Exactly one of `data`,
/// `source_file`, or `symlink_to` must be set.
#[derive(Debug, Default)]
pub struct WriteOptions {
    data: Option<Vec<u8>>,
    source_file: Option<PathBuf>,
    symlink_to: Option<PathBuf>,
    hash: Option<String>,
    sanitize: bool,
    executable: bool,
}

impl WriteOptions {
    /// Write the given bytes.
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// Copy the contents of an existing file; the file is recorded in the
    /// builder's watch set.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Create a symlink pointing at `target` instead of writing content.
    pub fn symlink(target: impl Into<PathBuf>) -> Self {
        Self {
            symlink_to: Some(target.into()),
            ..Self::default()
        }
    }

    /// Supply a precomputed content hash instead of hashing the data.
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Strip questionable characters from the path and uniquify its final
    /// component before writing.
    pub fn sanitized(mut self) -> Self {
        self.sanitize = true;
        self
    }

    /// Mark the output file executable.
    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }
}

/// Options for [`Builder::copy_directory`].
#[derive(Debug)]
pub struct CopyOptions {
    /// Source directory on disk.
    pub from: PathBuf,
    /// Destination directory, relative to the tree root.
    pub to: String,
    /// Glob patterns matched against entry basenames; directories are
    /// matched with a trailing slash. Matching entries are skipped.
    pub ignore: Vec<String>,
    /// Copy only these paths (relative to `to`); ancestors are implied.
    pub specific_files: Option<Vec<String>>,
    /// Link the whole directory as a single symlink instead of copying.
    /// Only honored when the destination is untouched and the platform has
    /// usable symlinks. Entry symlinks are reproduced as symlinks either
    /// way; targets outside the copied root are not resolved.
    pub symlink: bool,
}

impl CopyOptions {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ignore: Vec::new(),
            specific_files: None,
            symlink: false,
        }
    }

    pub fn ignore(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn specific_files(
        mut self,
        files: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.specific_files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    pub fn symlink(mut self, symlink: bool) -> Self {
        self.symlink = symlink;
        self
    }
}

/// Builds a directory tree and atomically promotes it to its final location.
#[derive(Debug)]
pub struct Builder {
    output_path: PathBuf,
    build_path: PathBuf,
    in_place: bool,
    ledger: PathLedger,
    written_hashes: HashMap<String, String>,
    previous_ledger: PathLedger,
    previous_hashes: HashMap<String, String>,
    watch_set: WatchSet,
}

impl Builder {
    pub fn new(options: BuilderOptions) -> BuildResult<Self> {
        let output_path = options.output_path;

        if let Some(previous) = &options.previous {
            if previous.output_path != output_path {
                return Err(BuildError::PreviousPathMismatch {
                    previous: previous.output_path.clone(),
                    current: output_path,
                });
            }
        }

        let reuse = options.in_place
            && IN_PLACE_SUPPORTED
            && options
                .previous
                .as_ref()
                .is_some_and(|p| p.output_path.exists());

        let (build_path, previous_ledger, previous_hashes, in_place) = if reuse {
            let previous = options.previous.expect("checked above");
            debug!(path = %output_path.display(), "reusing previous build tree in place");
            (
                output_path.clone(),
                previous.ledger,
                previous.written_hashes,
                true,
            )
        } else {
            let parent = match output_path.parent() {
                Some(p) if p != Path::new("") => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            fs::create_dir_all(&parent).map_err(|e| BuildError::io(&parent, e))?;

            let basename = output_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "out".to_string());
            let build_path = parent.join(format!(".build{}.{basename}", next_nonce()));

            if build_path.exists() {
                fs::remove_dir_all(&build_path).map_err(|e| BuildError::io(&build_path, e))?;
            }
            fs::create_dir_all(&build_path).map_err(|e| BuildError::io(&build_path, e))?;

            (build_path, PathLedger::new(), HashMap::new(), false)
        };

        Ok(Self {
            output_path,
            build_path,
            in_place,
            ledger: PathLedger::new(),
            written_hashes: HashMap::new(),
            previous_ledger,
            previous_hashes,
            watch_set: WatchSet::new(),
        })
    }

    pub fn build_path(&self) -> &Path {
        &self.build_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// All files read from disk while building, for rebuild triggering.
    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    /// Reserves `rel_path` as a file or directory so nothing else (including
    /// sanitized writes) can claim it. Every ancestor becomes a reserved
    /// directory, created on disk as needed. Reserving a path twice, or under
    /// something reserved as a file, is a fatal conflict.
    ///
    /// Returns the current (working-tree) location of the reserved path, so
    /// non-builder code can populate a reserved directory.
    pub fn reserve(&mut self, rel_path: &str, kind: EntryKind) -> BuildResult<PathBuf> {
        let rel_path = rel_path.trim_end_matches('/');
        let parts: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Err(BuildError::conflict(rel_path));
        }

        let mut so_far = String::new();
        for (i, part) in parts.iter().enumerate() {
            so_far = join_rel(&so_far, part);

            if self.ledger.is_file(&so_far) {
                return Err(BuildError::conflict(rel_path));
            }

            let should_be_directory = i < parts.len() - 1 || kind == EntryKind::Directory;
            if should_be_directory {
                if !self.ledger.contains(&so_far) {
                    self.materialize_directory(&so_far)?;
                }
            } else {
                if self.ledger.contains(&so_far) {
                    // Already a directory, or reserved twice.
                    return Err(BuildError::conflict(rel_path));
                }
                self.ledger.mark_file(so_far.clone());
            }
        }

        Ok(self.build_path.join(rel_path))
    }

    /// Generates and reserves a unique, sanitized name based on `rel_path`.
    pub fn generate_filename(&mut self, rel_path: &str, kind: EntryKind) -> BuildResult<String> {
        let sanitized = self
            .ledger
            .sanitize(rel_path, kind == EntryKind::Directory)?;
        self.reserve(&sanitized, kind)?;
        Ok(sanitized)
    }

    /// Writes a file (or symlink) at `rel_path`, creating enclosing
    /// directories. Content writes are skipped entirely when the previous
    /// run already wrote identical content (by hash) at the same path.
    /// Output files are read-only: they are generated artifacts.
    ///
    /// Returns the final canonical path written to (it differs from
    /// `rel_path` when sanitizing).
    pub fn write(&mut self, rel_path: &str, options: WriteOptions) -> BuildResult<String> {
        let mut rel_path = rel_path.trim_end_matches('/').to_string();
        if options.sanitize {
            rel_path = self.ledger.sanitize(&rel_path, false)?;
        }

        let sources =
            [options.data.is_some(), options.source_file.is_some(), options.symlink_to.is_some()]
                .iter()
                .filter(|present| **present)
                .count();
        if sources != 1 {
            return Err(BuildError::MissingWriteSource { path: rel_path });
        }

        self.ensure_directory(parent_of(&rel_path))?;
        if self.ledger.is_directory(&rel_path) {
            return Err(BuildError::conflict(&rel_path));
        }
        let abs_path = self.build_path.join(&rel_path);

        if let Some(target) = options.symlink_to {
            symlink_with_overwrite(&target, &abs_path)?;
        } else {
            let (data, file_hash) = match options.data {
                Some(data) => (data, None),
                None => {
                    let source = options.source_file.expect("counted above");
                    let data = fs::read(&source).map_err(|e| BuildError::io(&source, e))?;
                    let hash = hash_bytes(&data);
                    self.watch_set.add(source, Some(hash.clone()));
                    (data, Some(hash))
                }
            };
            let hash = options
                .hash
                .or(file_hash)
                .unwrap_or_else(|| hash_bytes(&data));

            if self.previous_hashes.get(&rel_path) == Some(&hash) {
                debug!(path = %rel_path, "content unchanged, skipping write");
            } else {
                atomic_rewrite(&abs_path, &data, options.executable)?;
            }
            self.written_hashes.insert(rel_path.clone(), hash);
        }

        self.ledger.mark_file(rel_path.clone());
        Ok(rel_path)
    }

    /// Serializes `value` as pretty JSON at `rel_path`. Control files are
    /// always rewritten.
    pub fn write_json<T: Serialize>(&mut self, rel_path: &str, value: &T) -> BuildResult<()> {
        let rel_path = rel_path.trim_end_matches('/');
        self.ensure_directory(parent_of(rel_path))?;
        if self.ledger.is_directory(rel_path) {
            return Err(BuildError::conflict(rel_path));
        }

        let mut data = serde_json::to_vec_pretty(value).map_err(|e| BuildError::Serialize {
            path: rel_path.to_string(),
            error: e,
        })?;
        data.push(b'\n');

        atomic_rewrite(&self.build_path.join(rel_path), &data, false)?;
        self.ledger.mark_file(rel_path.to_string());
        Ok(())
    }

    /// Convenience wrapper around [`Self::generate_filename`] and
    /// [`Self::write`].
    pub fn write_to_generated_filename(
        &mut self,
        rel_path: &str,
        options: WriteOptions,
    ) -> BuildResult<String> {
        let generated = self.generate_filename(rel_path, EntryKind::File)?;
        self.write(&generated, options)?;
        Ok(generated)
    }

    /// Recursively copies a directory into the tree, or links it as a single
    /// symlink when requested and possible. Copies are not hash-tracked and
    /// do not contribute to the watch set.
    pub fn copy_directory(&mut self, options: CopyOptions) -> BuildResult<()> {
        let to = options.to.trim_end_matches('/').to_string();

        let symlink_whole = options.symlink && cfg!(unix);
        if options.symlink && options.specific_files.is_some() {
            return Err(BuildError::SymlinkSpecificFiles { path: to });
        }
        if symlink_whole && self.ledger.is_file(&to) {
            return Err(BuildError::conflict(&to));
        }

        let mut ignore = GlobSetBuilder::new();
        for pattern in &options.ignore {
            let glob = Glob::new(pattern).map_err(|e| BuildError::InvalidIgnorePattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            ignore.add(glob);
        }
        let ignore = ignore.build().map_err(|e| BuildError::InvalidIgnorePattern {
            pattern: options.ignore.join(", "),
            reason: e.to_string(),
        })?;

        let specific_paths: Option<HashSet<String>> = options.specific_files.map(|files| {
            let mut set = HashSet::new();
            for file in files {
                let mut current = file.trim_matches('/').to_string();
                while !current.is_empty() {
                    set.insert(join_rel(&to, &current));
                    current = parent_of(&current).to_string();
                }
            }
            set
        });

        self.copy_walk(
            &options.from,
            &to,
            symlink_whole,
            &ignore,
            specific_paths.as_ref(),
        )
    }

    fn copy_walk(
        &mut self,
        abs_from: &Path,
        rel_to: &str,
        symlink_whole: bool,
        ignore: &GlobSet,
        specific_paths: Option<&HashSet<String>>,
    ) -> BuildResult<()> {
        if symlink_whole && !self.ledger.contains(rel_to) {
            self.ensure_directory(parent_of(rel_to))?;
            symlink_with_overwrite(abs_from, &self.build_path.join(rel_to))?;
            // A symlink counts as a file as far as what may go under it.
            self.ledger.mark_file(rel_to.to_string());
            return Ok(());
        }

        self.ensure_directory(rel_to)?;

        let mut entries: Vec<fs::DirEntry> = fs::read_dir(abs_from)
            .map_err(|e| BuildError::io(abs_from, e))?
            .collect::<Result<_, _>>()
            .map_err(|e| BuildError::io(abs_from, e))?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let this_abs = entry.path();
            let this_rel = join_rel(rel_to, &name);

            if let Some(specific) = specific_paths {
                if !specific.contains(&this_rel) {
                    continue;
                }
            }

            // lstat; entries that vanished mid-walk are skipped.
            let Ok(metadata) = fs::symlink_metadata(&this_abs) else {
                continue;
            };
            let file_type = metadata.file_type();

            let match_name = if file_type.is_dir() {
                format!("{name}/")
            } else {
                name.clone()
            };
            if ignore.is_match(&match_name) {
                continue;
            }

            if file_type.is_dir() {
                self.copy_walk(&this_abs, &this_rel, false, ignore, specific_paths)?;
            } else if file_type.is_symlink() && cfg!(unix) {
                let target = fs::read_link(&this_abs).map_err(|e| BuildError::io(&this_abs, e))?;
                symlink_with_overwrite(&target, &self.build_path.join(&this_rel))?;
                self.ledger.mark_file(this_rel);
            } else {
                let data = fs::read(&this_abs).map_err(|e| BuildError::io(&this_abs, e))?;
                let dest = self.build_path.join(&this_rel);
                fs::write(&dest, data).map_err(|e| BuildError::io(&dest, e))?;
                set_copied_permissions(&dest, &metadata)?;
                self.ledger.mark_file(this_rel);
            }
        }

        Ok(())
    }

    /// Returns a view of this builder that interprets every relative path
    /// under `rel_path`.
    pub fn enter(&mut self, rel_path: &str) -> SubBuilder<'_> {
        SubBuilder {
            builder: self,
            prefix: rel_path.trim_end_matches('/').to_string(),
        }
    }

    /// Moves the completed tree into its final location.
    ///
    /// In in-place mode this first deletes everything the previous run wrote
    /// that this run did not. Promotion is an atomic rename wherever the
    /// filesystem allows it, falling back to delete-and-copy on filesystems
    /// that refuse cross-tree renames.
    ///
    /// Returns the snapshot a future builder needs to reuse this tree.
    pub fn complete(self) -> BuildResult<PreviousBuild> {
        if self.in_place {
            self.prune_stale_entries()?;
        }

        if self.build_path != self.output_path {
            promote(&self.build_path, &self.output_path)?;
        }
        info!(path = %self.output_path.display(), "build tree complete");

        Ok(PreviousBuild {
            output_path: self.output_path,
            ledger: self.ledger,
            written_hashes: self.written_hashes,
        })
    }

    /// Deletes the partially-built working tree. Never touches the final
    /// output path; in in-place mode (where the working tree *is* the output
    /// tree) this leaves everything as it lies.
    pub fn abort(self) -> BuildResult<()> {
        if self.build_path != self.output_path {
            match fs::remove_dir_all(&self.build_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BuildError::io(&self.build_path, e)),
            }
        }
        Ok(())
    }

    /// Deletes files and directories left over from the previous run that
    /// this run did not re-use.
    fn prune_stale_entries(&self) -> BuildResult<()> {
        let mut removed: HashSet<String> = HashSet::new();
        let previous: Vec<(&str, EntryKind)> = self
            .previous_ledger
            .iter()
            .filter(|(path, _)| !path.is_empty() && *path != ".")
            .collect();

        for (path, kind) in &previous {
            if self.ledger.contains(path) || removed.contains(*path) {
                continue;
            }

            let abs = self.build_path.join(path);
            let result = match kind {
                EntryKind::File => fs::remove_file(&abs),
                EntryKind::Directory => fs::remove_dir_all(&abs),
            };
            match result {
                Ok(()) => debug!(path = %path, "pruned stale entry"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BuildError::io(&abs, e)),
            }
            removed.insert((*path).to_string());

            if *kind == EntryKind::Directory {
                // Everything logically under it is gone too.
                let child_prefix = format!("{path}/");
                for (other, _) in &previous {
                    if other.starts_with(&child_prefix) {
                        removed.insert((*other).to_string());
                    }
                }
            }
        }

        Ok(())
    }

    fn ensure_directory(&mut self, rel_path: &str) -> BuildResult<()> {
        let mut so_far = String::new();
        for part in rel_path.split('/').filter(|p| !p.is_empty()) {
            so_far = join_rel(&so_far, part);
            if !self.ledger.contains(&so_far) {
                self.materialize_directory(&so_far)?;
            } else if self.ledger.is_file(&so_far) {
                return Err(BuildError::PrefixIsFile {
                    path: rel_path.to_string(),
                    prefix: so_far,
                });
            }
        }
        Ok(())
    }

    /// Creates a directory at a not-yet-reserved path, clearing out a stale
    /// file the previous run may have left there.
    fn materialize_directory(&mut self, rel_path: &str) -> BuildResult<()> {
        let abs = self.build_path.join(rel_path);
        if self.previous_ledger.is_file(rel_path) {
            match fs::remove_file(&abs) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BuildError::io(&abs, e)),
            }
        }
        if !self.previous_ledger.is_directory(rel_path) {
            fs::create_dir_all(&abs).map_err(|e| BuildError::io(&abs, e))?;
        }
        self.ledger.mark_directory(rel_path.to_string());
        Ok(())
    }
}

/// A builder view with every relative path prefixed, so nested tree sections
/// compose without path bookkeeping at call sites. The ledger stays owned by
/// the root builder; a sub-builder is just a borrow plus a prefix.
#[derive(Debug)]
pub struct SubBuilder<'a> {
    builder: &'a mut Builder,
    prefix: String,
}

impl SubBuilder<'_> {
    fn join(&self, rel_path: &str) -> String {
        join_rel(&self.prefix, rel_path)
    }

    pub fn reserve(&mut self, rel_path: &str, kind: EntryKind) -> BuildResult<PathBuf> {
        self.builder.reserve(&self.join(rel_path), kind)
    }

    pub fn write(&mut self, rel_path: &str, options: WriteOptions) -> BuildResult<String> {
        self.builder.write(&self.join(rel_path), options)
    }

    pub fn write_json<T: Serialize>(&mut self, rel_path: &str, value: &T) -> BuildResult<()> {
        self.builder.write_json(&self.join(rel_path), value)
    }

    /// Like [`Builder::generate_filename`], with the result re-expressed
    /// relative to this sub-builder's root.
    pub fn generate_filename(&mut self, rel_path: &str, kind: EntryKind) -> BuildResult<String> {
        let generated = self.builder.generate_filename(&self.join(rel_path), kind)?;
        let prefix = format!("{}/", self.prefix);
        match generated.strip_prefix(&prefix) {
            Some(stripped) => Ok(stripped.to_string()),
            None => Err(BuildError::BuildFailed(format!(
                "generated filename {generated} escaped sub-builder {}",
                self.prefix
            ))),
        }
    }

    pub fn write_to_generated_filename(
        &mut self,
        rel_path: &str,
        options: WriteOptions,
    ) -> BuildResult<String> {
        let generated = self.generate_filename(rel_path, EntryKind::File)?;
        self.write(&generated, options)?;
        Ok(generated)
    }

    pub fn copy_directory(&mut self, mut options: CopyOptions) -> BuildResult<()> {
        options.to = self.join(&options.to);
        self.builder.copy_directory(options)
    }

    pub fn enter(&mut self, rel_path: &str) -> SubBuilder<'_> {
        let prefix = self.join(rel_path.trim_end_matches('/'));
        SubBuilder {
            builder: self.builder,
            prefix,
        }
    }
}

/// Writes `data` to a sibling temp file and renames it over `path`, so an
/// observer never sees a truncated file. Output files are read-only, with
/// the executable bits only when asked.
fn atomic_rewrite(path: &Path, data: &[u8], executable: bool) -> BuildResult<()> {
    let parent = match path.parent() {
        Some(p) if p != Path::new("") => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".build-tmp-")
        .tempfile_in(parent)
        .map_err(|e| BuildError::io(parent, e))?;
    tmp.write_all(data).map_err(|e| BuildError::io(path, e))?;
    set_output_permissions(tmp.as_file(), executable).map_err(|e| BuildError::io(path, e))?;

    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(persist_error) => {
            // Replacing a directory with a file. Rare, but legitimate when a
            // file appears where a directory used to be.
            if path.is_dir() {
                fs::remove_dir_all(path).map_err(|e| BuildError::io(path, e))?;
                persist_error
                    .file
                    .persist(path)
                    .map_err(|e| BuildError::io(path, e.error))?;
                Ok(())
            } else {
                Err(BuildError::io(path, persist_error.error))
            }
        }
    }
}

#[cfg(unix)]
fn set_output_permissions(file: &fs::File, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o555 } else { 0o444 };
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_output_permissions(file: &fs::File, _executable: bool) -> std::io::Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(true);
    file.set_permissions(permissions)
}

#[cfg(unix)]
fn set_copied_permissions(path: &Path, source: &fs::Metadata) -> BuildResult<()> {
    use std::os::unix::fs::PermissionsExt;
    // World-readable, executable when the source is owner-executable. The
    // mode is not copied directly because sources may live in read-only
    // trees while copies must stay writable.
    let mode = if source.permissions().mode() & 0o100 != 0 {
        0o777
    } else {
        0o666
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| BuildError::io(path, e))
}

#[cfg(not(unix))]
fn set_copied_permissions(_path: &Path, _source: &fs::Metadata) -> BuildResult<()> {
    Ok(())
}

/// Creates a symlink, replacing whatever already sits at `target`.
#[cfg(unix)]
fn symlink_with_overwrite(source: &Path, target: &Path) -> BuildResult<()> {
    use std::os::unix::fs::symlink;
    match symlink(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let existing = fs::symlink_metadata(target).map_err(|e| BuildError::io(target, e))?;
            if existing.is_dir() {
                fs::remove_dir_all(target).map_err(|e| BuildError::io(target, e))?;
            } else {
                fs::remove_file(target).map_err(|e| BuildError::io(target, e))?;
            }
            symlink(source, target).map_err(|e| BuildError::io(target, e))
        }
        Err(e) => Err(BuildError::io(target, e)),
    }
}

#[cfg(not(unix))]
fn symlink_with_overwrite(_source: &Path, target: &Path) -> BuildResult<()> {
    Err(BuildError::SymlinkUnsupported {
        path: target.display().to_string(),
    })
}

/// Moves `from` over `to`. The old tree at `to` is first moved aside and
/// deleted after the new tree is in place, so the swap is a single rename on
/// cooperative filesystems. Overlay filesystems that refuse the rename get a
/// delete-and-copy instead.
fn promote(from: &Path, to: &Path) -> BuildResult<()> {
    let parent = match to.parent() {
        Some(p) if p != Path::new("") => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let basename = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let garbage = parent.join(format!("{basename}-garbage-{}", next_nonce()));

    let mut cleanup_garbage = false;
    let mut force_copy = false;

    match fs::rename(to, &garbage) {
        Ok(()) => cleanup_garbage = true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(_) => force_copy = true,
    }

    if !force_copy && fs::rename(from, to).is_err() {
        force_copy = true;
    }

    if force_copy {
        info!(path = %to.display(), "rename refused by filesystem, copying instead");
        match fs::remove_dir_all(to) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::io(to, e)),
        }
        copy_tree(from, to)?;
        fs::remove_dir_all(from).map_err(|e| BuildError::io(from, e))?;
    }

    if cleanup_garbage {
        let _ = fs::remove_dir_all(&garbage);
    }

    Ok(())
}

/// Recursively copies a tree, preserving symlinks.
fn copy_tree(from: &Path, to: &Path) -> BuildResult<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            BuildError::BuildFailed(format!("walking {}: {e}", from.display()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .expect("walkdir yields children of its root");
        let dest = to.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| BuildError::io(&dest, e))?;
        } else if file_type.is_symlink() && cfg!(unix) {
            let target = fs::read_link(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;
            symlink_with_overwrite(&target, &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|e| BuildError::io(&dest, e))?;
        }
    }
    Ok(())
}
