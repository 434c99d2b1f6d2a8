//! Strata package model
//!
//! The data model for package-oriented builds: packages and their dependency
//! edges, per-architecture build units and their resources, change-tracking
//! watch sets, and load-order resolution over a package catalog.

pub mod arch;
pub mod catalog;
pub mod load_order;
pub mod messages;
pub mod package;
pub mod resource;
pub mod unibuild;
pub mod watchset;

pub use arch::{arch_matches, most_specific_match};
pub use catalog::{MemoryCatalog, PackageCatalog};
pub use load_order::{for_each_used_unit, LoadOrder, LoadOrderResolver, WalkOptions};
pub use messages::{BuildMessage, MessageSet};
pub use package::{is_feature_package, BuildMode, Edge, Package};
pub use resource::{FileResource, Resource, SourceResource};
pub use unibuild::{BuildUnit, BuildUnitBuilder, Export, UnitId, UnitKind};
pub use watchset::WatchSet;

/// Package model errors
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("a dependency on {package_name} may not be both unordered and weak")]
    InvalidEdge { package_name: String },

    #[error("package {package_name} may not depend on itself")]
    SelfDependency { package_name: String },

    #[error("build unit {unit} does not belong to package {package}")]
    ForeignUnit { package: String, unit: String },
}

pub type Result<T> = std::result::Result<T, PackageError>;
