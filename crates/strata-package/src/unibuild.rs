//! Build units: one package compiled for one architecture.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::package::Edge;
use crate::resource::Resource;
use crate::watchset::WatchSet;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local identity of a build unit. Fresh per construction, never
/// persisted; two deserialized copies of the same unit are distinct units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    fn fresh() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Whether a unit is the package's main build or a build-plugin program.
/// Only main units contribute to the used-package-names set during load-order
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    Main,
    Plugin,
}

/// A declared export symbol of a build unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
}

impl Export {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The compiled-for-one-architecture output of a package.
///
/// Created by the compiler collaborator; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildUnit {
    #[serde(skip, default)]
    id: UnitId,
    kind: UnitKind,
    package_name: Option<String>,
    arch: String,
    uses: Vec<Edge>,
    implies: Vec<Edge>,
    declared_exports: Vec<Export>,
    resources: Vec<Resource>,
    watch_set: WatchSet,
}

impl BuildUnit {
    pub fn builder(package_name: Option<&str>, arch: impl Into<String>) -> BuildUnitBuilder {
        BuildUnitBuilder {
            unit: BuildUnit {
                id: UnitId::fresh(),
                kind: UnitKind::Main,
                package_name: package_name.map(str::to_owned),
                arch: arch.into(),
                uses: Vec::new(),
                implies: Vec::new(),
                declared_exports: Vec::new(),
                resources: Vec::new(),
                watch_set: WatchSet::new(),
            },
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    pub fn display_name(&self) -> String {
        match &self.package_name {
            Some(name) => format!("{name} ({})", self.arch),
            None => format!("the app ({})", self.arch),
        }
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn uses(&self) -> &[Edge] {
        &self.uses
    }

    pub fn implies(&self) -> &[Edge] {
        &self.implies
    }

    pub fn declared_exports(&self) -> &[Export] {
        &self.declared_exports
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }
}

/// Step-wise construction for [`BuildUnit`]; the result is immutable.
#[derive(Debug)]
pub struct BuildUnitBuilder {
    unit: BuildUnit,
}

impl BuildUnitBuilder {
    pub fn kind(mut self, kind: UnitKind) -> Self {
        self.unit.kind = kind;
        self
    }

    pub fn use_edge(mut self, edge: Edge) -> Self {
        self.unit.uses.push(edge);
        self
    }

    pub fn uses<I: IntoIterator<Item = Edge>>(mut self, edges: I) -> Self {
        self.unit.uses.extend(edges);
        self
    }

    pub fn imply(mut self, edge: Edge) -> Self {
        self.unit.implies.push(edge);
        self
    }

    pub fn export(mut self, export: Export) -> Self {
        self.unit.declared_exports.push(export);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.unit.resources.push(resource);
        self
    }

    pub fn watch_set(mut self, watch_set: WatchSet) -> Self {
        self.unit.watch_set = watch_set;
        self
    }

    pub fn build(self) -> BuildUnit {
        self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_ids_are_unique() {
        let a = BuildUnit::builder(Some("a"), "os").build();
        let b = BuildUnit::builder(Some("a"), "os").build();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_display_name() {
        let unit = BuildUnit::builder(Some("blaze"), "web.browser").build();
        assert_eq!(unit.display_name(), "blaze (web.browser)");

        let app = BuildUnit::builder(None, "os").build();
        assert_eq!(app.display_name(), "the app (os)");
    }

    #[test]
    fn test_declared_exports() {
        let unit = BuildUnit::builder(Some("blaze"), "web")
            .export(Export::new("Blaze"))
            .export(Export::new("UI"))
            .build();
        let names: Vec<&str> = unit
            .declared_exports()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, ["Blaze", "UI"]);
    }
}
