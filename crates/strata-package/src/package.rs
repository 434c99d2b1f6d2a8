//! Packages and dependency edges.

use serde::{Deserialize, Serialize};

use crate::arch;
use crate::unibuild::BuildUnit;
use crate::{PackageError, Result};

/// Prefix marking a pseudo-package: a feature capability marker rather than
/// an actual buildable unit. Feature packages may appear in dependency edges
/// but are never resolved, ordered, or included in a target.
const FEATURE_PREFIX: &str = "feature:";

/// Returns `true` for pseudo-package names that only mark a build feature.
pub fn is_feature_package(name: &str) -> bool {
    name.starts_with(FEATURE_PREFIX)
}

/// Environment mode a target is built for. Controls whether `debug_only` /
/// `prod_only` packages are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    Development,
    Production,
}

/// A dependency edge from one package to another.
///
/// `unordered` drops the load-before constraint; `weak` drops the forced
/// inclusion (the edge only orders against the target if something else pulls
/// it in). An edge that is both would constrain nothing, so constructing one
/// is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub package_name: String,
    /// Version constraint, carried for the external version solver. Never
    /// interpreted here.
    pub constraint: Option<semver::VersionReq>,
    pub unordered: bool,
    pub weak: bool,
}

impl Edge {
    pub fn new(
        package_name: impl Into<String>,
        constraint: Option<semver::VersionReq>,
        unordered: bool,
        weak: bool,
    ) -> Result<Self> {
        let package_name = package_name.into();
        if unordered && weak {
            return Err(PackageError::InvalidEdge { package_name });
        }
        Ok(Self {
            package_name,
            constraint,
            unordered,
            weak,
        })
    }

    /// A plain ordered, strong edge.
    pub fn ordered(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            constraint: None,
            unordered: false,
            weak: false,
        }
    }

    /// An edge that forces inclusion but imposes no load order.
    pub fn unordered(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            constraint: None,
            unordered: true,
            weak: false,
        }
    }

    /// An edge that orders but does not force inclusion.
    pub fn weak(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            constraint: None,
            unordered: false,
            weak: true,
        }
    }

    /// An implied edge. Implies edges are always ordered and strong.
    pub fn implied(package_name: impl Into<String>) -> Self {
        Self::ordered(package_name)
    }

    pub fn with_constraint(mut self, constraint: semver::VersionReq) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

/// A named unit of dependency metadata, files, and contributed processors.
///
/// The application itself is a package with no name. Packages are immutable
/// once loaded; the catalog hands out shared references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    name: Option<String>,
    /// Included only in development-mode targets.
    pub debug_only: bool,
    /// Included only in production-mode targets.
    pub prod_only: bool,
    unibuilds: Vec<BuildUnit>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            debug_only: false,
            prod_only: false,
            unibuilds: Vec::new(),
        }
    }

    /// The app pseudo-package: unnamed, never looked up through a catalog.
    pub fn app() -> Self {
        Self {
            name: None,
            debug_only: false,
            prod_only: false,
            unibuilds: Vec::new(),
        }
    }

    pub fn debug_only(mut self) -> Self {
        self.debug_only = true;
        self
    }

    pub fn prod_only(mut self) -> Self {
        self.prod_only = true;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("the app")
    }

    /// True if this package is excluded from a target built in `mode`.
    pub fn filtered_out(&self, mode: BuildMode) -> bool {
        (self.debug_only && mode == BuildMode::Production)
            || (self.prod_only && mode != BuildMode::Production)
    }

    pub fn unibuilds(&self) -> &[BuildUnit] {
        &self.unibuilds
    }

    /// Adds a compiled build unit. The unit must belong to this package and
    /// must not directly depend on it; a package using itself is malformed
    /// metadata and rejected before resolution ever sees it.
    pub fn push_unibuild(&mut self, unit: BuildUnit) -> Result<()> {
        if unit.package_name() != self.name() {
            return Err(PackageError::ForeignUnit {
                package: self.display_name().to_string(),
                unit: unit.display_name(),
            });
        }
        if let Some(name) = self.name() {
            if unit.uses().iter().any(|edge| edge.package_name == name) {
                return Err(PackageError::SelfDependency {
                    package_name: name.to_string(),
                });
            }
        }
        self.unibuilds.push(unit);
        Ok(())
    }

    /// Returns the build unit whose architecture is the most specific match
    /// for `arch`, or `None` if this package has no compatible unit.
    pub fn unibuild_at_arch(&self, arch: &str) -> Option<&BuildUnit> {
        let chosen = arch::most_specific_match(arch, self.unibuilds.iter().map(BuildUnit::arch))?;
        self.unibuilds.iter().find(|u| u.arch() == chosen)
    }
}
