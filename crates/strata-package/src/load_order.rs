//! Load-order resolution.
//!
//! Given a set of root packages, compute which build units a target uses and
//! a valid order to load them in: if X uses Y and the edge is not marked
//! unordered, Y loads before X. Weak edges order against their target only
//! when some strong edge pulled that package in; unordered edges force
//! inclusion without constraining order.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::catalog::PackageCatalog;
use crate::messages::MessageSet;
use crate::package::{is_feature_package, BuildMode, Edge, Package};
use crate::unibuild::{BuildUnit, UnitId, UnitKind};

/// Options for one dependency walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions<'a> {
    pub arch: &'a str,
    pub mode: BuildMode,
    /// Skip edges marked unordered (used when walking for ordering, not
    /// membership).
    pub skip_unordered: bool,
    /// Weak edges are followed only when their target package is in this
    /// set. `None` skips all weak edges.
    pub acceptable_weak_packages: Option<&'a BTreeSet<String>>,
}

/// Visits the build unit behind each edge in `edges`, plus the units implied
/// by anything visited, deduplicated by unit identity.
///
/// Feature pseudo-packages are skipped silently. Packages filtered out by the
/// build mode are skipped silently. A package missing from the catalog, or
/// present but with no unit compatible with the requested architecture, is a
/// recoverable error: reported and skipped.
pub fn for_each_used_unit<'a>(
    catalog: &'a dyn PackageCatalog,
    edges: &[Edge],
    options: &WalkOptions<'_>,
    messages: &mut MessageSet,
    callback: &mut dyn FnMut(&'a BuildUnit),
) {
    let mut queue: VecDeque<Edge> = edges
        .iter()
        .filter(|edge| {
            if options.skip_unordered && edge.unordered {
                return false;
            }
            if edge.weak {
                return options
                    .acceptable_weak_packages
                    .is_some_and(|ok| ok.contains(&edge.package_name));
            }
            true
        })
        .cloned()
        .collect();

    let mut visited: HashSet<UnitId> = HashSet::new();

    while let Some(edge) = queue.pop_front() {
        if is_feature_package(&edge.package_name) {
            continue;
        }

        let Some(package) = catalog.package(&edge.package_name) else {
            messages.error(format!("unknown package {}", edge.package_name));
            continue;
        };

        if package.filtered_out(options.mode) {
            continue;
        }

        let Some(unit) = package.unibuild_at_arch(options.arch) else {
            messages.error(format!(
                "{} is not compatible with architecture '{}'",
                package.display_name(),
                options.arch
            ));
            continue;
        };

        if !visited.insert(unit.id()) {
            continue;
        }

        callback(unit);

        // Implied edges are plain ordered/strong edges by construction, so
        // they need no re-filtering.
        queue.extend(unit.implies().iter().cloned());
    }
}

/// The result of load-order resolution.
#[derive(Debug)]
pub struct LoadOrder<'a> {
    /// Every used build unit, ordered so each ordered dependency precedes
    /// its dependents.
    pub units: Vec<&'a BuildUnit>,
    /// Names of all real packages in the target. Weak edges are accepted
    /// against this set.
    pub used_packages: BTreeSet<String>,
}

/// Two-phase load-order resolution over a package catalog.
pub struct LoadOrderResolver<'a, 'b> {
    catalog: &'a dyn PackageCatalog,
    arch: &'b str,
    mode: BuildMode,
}

impl<'a, 'b> LoadOrderResolver<'a, 'b> {
    pub fn new(catalog: &'a dyn PackageCatalog, arch: &'b str, mode: BuildMode) -> Self {
        Self {
            catalog,
            arch,
            mode,
        }
    }

    /// Resolves the used set and load order for `roots`.
    ///
    /// Recoverable problems (arch mismatches, unknown packages, dependency
    /// cycles) are reported into `messages`; a cycle is recovered by not
    /// enforcing one of its edges, so the returned order is always complete
    /// over the used set. If resolution reported any new message the result
    /// is empty: a target must not be built from a partially-resolved graph.
    pub fn resolve(&self, roots: &[&'a Package], messages: &mut MessageSet) -> LoadOrder<'a> {
        let baseline = messages.len();

        let mut root_units: Vec<&'a BuildUnit> = Vec::new();
        for package in roots {
            if package.filtered_out(self.mode) {
                continue;
            }
            match package.unibuild_at_arch(self.arch) {
                Some(unit) => root_units.push(unit),
                None => messages.error(format!(
                    "{} is not compatible with architecture '{}'",
                    package.display_name(),
                    self.arch
                )),
            }
        }
        if messages.len() > baseline {
            return LoadOrder {
                units: Vec::new(),
                used_packages: BTreeSet::new(),
            };
        }

        // Phase 1: membership. Weak edges are ignored here because they do
        // not create a must-use constraint; unordered edges are followed
        // because they do.
        let mut membership = Membership {
            catalog: self.catalog,
            arch: self.arch,
            mode: self.mode,
            used: Vec::new(),
            used_ids: HashSet::new(),
            used_packages: BTreeSet::new(),
        };
        for unit in &root_units {
            membership.add(unit, messages);
        }
        if messages.len() > baseline {
            return LoadOrder {
                units: Vec::new(),
                used_packages: membership.used_packages,
            };
        }

        debug!(
            arch = self.arch,
            units = membership.used.len(),
            "resolved target membership"
        );

        // Phase 2: ordering. Take units in discovery order (the documented
        // deterministic tie-break) and place each after its ordered
        // dependencies.
        let mut placement = Placement {
            catalog: self.catalog,
            arch: self.arch,
            mode: self.mode,
            used_packages: &membership.used_packages,
            needed: membership.used.iter().map(|u| u.id()).collect(),
            on_stack: HashSet::new(),
            ordered: Vec::with_capacity(membership.used.len()),
        };
        for unit in &membership.used {
            placement.place(unit, messages);
        }
        let units = placement.ordered;

        LoadOrder {
            units,
            used_packages: membership.used_packages,
        }
    }
}

struct Membership<'a, 'b> {
    catalog: &'a dyn PackageCatalog,
    arch: &'b str,
    mode: BuildMode,
    used: Vec<&'a BuildUnit>,
    used_ids: HashSet<UnitId>,
    used_packages: BTreeSet<String>,
}

impl<'a> Membership<'a, '_> {
    fn add(&mut self, unit: &'a BuildUnit, messages: &mut MessageSet) {
        if !self.used_ids.insert(unit.id()) {
            return;
        }
        self.used.push(unit);
        if unit.kind() == UnitKind::Main {
            // Only real packages count toward weak-edge acceptance, not
            // plugin pseudo-units.
            if let Some(name) = unit.package_name() {
                self.used_packages.insert(name.to_string());
            }
        }

        let mut dependencies: Vec<&'a BuildUnit> = Vec::new();
        for_each_used_unit(
            self.catalog,
            unit.uses(),
            &WalkOptions {
                arch: self.arch,
                mode: self.mode,
                skip_unordered: false,
                acceptable_weak_packages: None,
            },
            messages,
            &mut |dependency| dependencies.push(dependency),
        );
        for dependency in dependencies {
            self.add(dependency, messages);
        }
    }
}

struct Placement<'a, 'b> {
    catalog: &'a dyn PackageCatalog,
    arch: &'b str,
    mode: BuildMode,
    used_packages: &'b BTreeSet<String>,
    needed: HashSet<UnitId>,
    on_stack: HashSet<UnitId>,
    ordered: Vec<&'a BuildUnit>,
}

impl<'a> Placement<'a, '_> {
    fn place(&mut self, unit: &'a BuildUnit, messages: &mut MessageSet) {
        if !self.needed.contains(&unit.id()) {
            return;
        }

        let mut dependencies: Vec<&'a BuildUnit> = Vec::new();
        for_each_used_unit(
            self.catalog,
            unit.uses(),
            &WalkOptions {
                arch: self.arch,
                mode: self.mode,
                skip_unordered: true,
                acceptable_weak_packages: Some(self.used_packages),
            },
            messages,
            &mut |dependency| dependencies.push(dependency),
        );

        for dependency in dependencies {
            if self.on_stack.contains(&dependency.id()) {
                messages.error(format!(
                    "circular dependency between packages {} and {}",
                    unit.package_name().unwrap_or("the app"),
                    dependency.package_name().unwrap_or("the app"),
                ));
                // Recover by not enforcing this one edge.
                continue;
            }
            self.on_stack.insert(dependency.id());
            self.place(dependency, messages);
            self.on_stack.remove(&dependency.id());
        }

        self.ordered.push(unit);
        self.needed.remove(&unit.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;

    fn package(name: &str, uses: Vec<Edge>) -> Package {
        let mut pkg = Package::new(name);
        pkg.push_unibuild(BuildUnit::builder(Some(name), "os").uses(uses).build())
            .unwrap();
        pkg
    }

    #[test]
    fn test_walk_follows_implies() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(package("base", vec![]));

        let mut templating = Package::new("templating");
        templating
            .push_unibuild(
                BuildUnit::builder(Some("templating"), "os")
                    .imply(Edge::implied("base"))
                    .build(),
            )
            .unwrap();
        catalog.insert(templating);

        let mut names = Vec::new();
        for_each_used_unit(
            &catalog,
            &[Edge::ordered("templating")],
            &WalkOptions {
                arch: "os",
                mode: BuildMode::Production,
                skip_unordered: false,
                acceptable_weak_packages: None,
            },
            &mut MessageSet::new(),
            &mut |unit| names.push(unit.package_name().unwrap().to_string()),
        );
        assert_eq!(names, ["templating", "base"]);
    }

    #[test]
    fn test_walk_skips_feature_packages() {
        let catalog = MemoryCatalog::new();
        let mut messages = MessageSet::new();
        let mut count = 0;
        for_each_used_unit(
            &catalog,
            &[Edge::ordered("feature:compiler-plugin")],
            &WalkOptions {
                arch: "os",
                mode: BuildMode::Production,
                skip_unordered: false,
                acceptable_weak_packages: None,
            },
            &mut messages,
            &mut |_| count += 1,
        );
        assert_eq!(count, 0);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_walk_reports_unknown_package() {
        let catalog = MemoryCatalog::new();
        let mut messages = MessageSet::new();
        for_each_used_unit(
            &catalog,
            &[Edge::ordered("ghost")],
            &WalkOptions {
                arch: "os",
                mode: BuildMode::Production,
                skip_unordered: false,
                acceptable_weak_packages: None,
            },
            &mut messages,
            &mut |_| {},
        );
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_wrong_arch_is_reported() {
        let mut catalog = MemoryCatalog::new();
        let mut web_only = Package::new("dom");
        web_only
            .push_unibuild(BuildUnit::builder(Some("dom"), "web").build())
            .unwrap();
        catalog.insert(web_only);

        let mut messages = MessageSet::new();
        for_each_used_unit(
            &catalog,
            &[Edge::ordered("dom")],
            &WalkOptions {
                arch: "os",
                mode: BuildMode::Production,
                skip_unordered: false,
                acceptable_weak_packages: None,
            },
            &mut messages,
            &mut |_| {},
        );
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().next().unwrap().text.contains("dom"));
    }
}
