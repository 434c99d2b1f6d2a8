//! Typed resource blobs carried by build units.

use serde::{Deserialize, Serialize};

/// A raw source file that still needs to be run through a source processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResource {
    /// Path relative to the owning package root, forward slashes.
    pub path: String,
    /// Pre-split extension, when the compile step already classified the
    /// file by extension. `None` means "match by exact filename".
    pub extension: Option<String>,
    pub data: Vec<u8>,
    /// Content hash of `data`, as recorded by the change tracker.
    pub hash: String,
}

/// A finished file-shaped resource: script, stylesheet, or static asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResource {
    /// Path this resource is served/addressed at, forward slashes. May carry
    /// a leading slash; consumers strip it.
    pub serve_path: String,
    pub data: Vec<u8>,
    pub hash: Option<String>,
}

impl FileResource {
    pub fn new(serve_path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            serve_path: serve_path.into(),
            data,
            hash: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

/// A typed output blob produced by compiling a build unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    /// Raw source pending processing by a source processor.
    Source(SourceResource),
    /// A JavaScript-role program file, loaded at startup in emission order.
    Script(FileResource),
    /// A stylesheet; only meaningful on web targets.
    Stylesheet(FileResource),
    /// A static asset, served or bundled verbatim.
    Asset(FileResource),
    /// Markup fragment for the document head. Web targets only.
    HeadMarkup(Vec<u8>),
    /// Markup fragment for the document body. Web targets only.
    BodyMarkup(Vec<u8>),
}

impl Resource {
    pub fn source(
        path: impl Into<String>,
        extension: Option<&str>,
        data: impl Into<Vec<u8>>,
        hash: impl Into<String>,
    ) -> Self {
        Resource::Source(SourceResource {
            path: path.into(),
            extension: extension.map(str::to_owned),
            data: data.into(),
            hash: hash.into(),
        })
    }

    /// Short kind tag used in messages and manifests.
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Source(_) => "source",
            Resource::Script(_) => "js",
            Resource::Stylesheet(_) => "css",
            Resource::Asset(_) => "asset",
            Resource::HeadMarkup(_) => "head",
            Resource::BodyMarkup(_) => "body",
        }
    }
}
