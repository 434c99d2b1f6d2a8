//! Strata build infrastructure
//!
//! Turns resolved package build units into artifact trees on disk:
//! - Source classification and dispatch across package-contributed
//!   compilers, linters, and minifiers, with deterministic precedence and
//!   conflict detection
//! - Crash-safe, incremental output construction: a working tree is built
//!   under a temporary name (or the previous output is patched in place) and
//!   promoted atomically, reusing unchanged files by content hash
//! - Target orchestration: load order in, ordered resource emission and a
//!   JSON control manifest out

pub mod builder;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod manifest;
pub mod processor;
pub mod target;

// Re-export main types
pub use builder::{
    Builder, BuilderOptions, CopyOptions, PreviousBuild, SubBuilder, WriteOptions,
    IN_PLACE_SUPPORTED,
};
pub use error::{BuildError, BuildResult};
pub use hash::{hash_bytes, hash_file};
pub use ledger::{EntryKind, PathLedger};
pub use manifest::{EntryLocation, ManifestEntry, TargetManifest, MANIFEST_FORMAT};
pub use processor::{
    BundleFile, Classification, CompilerPlugin, HtmlSection, LegacyHandler, LegacyRegistration,
    LinterPlugin, MinifierPlugin, PluginError, PluginInstance, ProcessorKind, ProcessorRegistry,
    RegistrationOptions, SetOptions, SourceInput, SourceProcessor, SourceProcessorSet,
};
pub use target::{MakeOptions, Target, TargetFile, TargetOptions, TargetOutcome};

// Re-export the package-model types callers hold alongside these
pub use strata_package::{BuildMode, MessageSet, WatchSet};
