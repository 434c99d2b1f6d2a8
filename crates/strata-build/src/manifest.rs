//! The `program.json` control file written at the root of a target's tree.

use serde::{Deserialize, Serialize};

/// Schema tag for the current manifest format.
pub const MANIFEST_FORMAT: &str = "strata-program-1";

/// Where an entry is consumed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryLocation {
    /// Served to browsers over HTTP.
    Client,
    /// Loaded by the server program at startup.
    Server,
    /// Consumed by the build driver itself (head/body fragments).
    Internal,
}

/// One written file of the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the tree root.
    pub path: String,
    /// Resource kind: `js`, `css`, `asset`, `head`, or `body`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "where")]
    pub location: EntryLocation,
    pub cacheable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Size of the written file in bytes.
    pub size: u64,
    /// SHA-256 content hash.
    pub hash: String,
}

/// The target manifest: every emitted file, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetManifest {
    pub format: String,
    pub arch: String,
    pub manifest: Vec<ManifestEntry>,
}

impl TargetManifest {
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            format: MANIFEST_FORMAT.to_string(),
            arch: arch.into(),
            manifest: Vec::new(),
        }
    }
}
