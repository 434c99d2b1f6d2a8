//! Package lookup.
//!
//! Packages are compiled and cached by an external collaborator; the core
//! only needs to look them up by name.

use std::collections::BTreeMap;

use crate::package::Package;

/// The external package map/cache, narrowed to name lookup.
pub trait PackageCatalog {
    fn package(&self, name: &str) -> Option<&Package>;
}

/// A plain in-memory catalog. Hosts that already hold all packages (and
/// tests) use this directly.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    packages: BTreeMap<String, Package>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `package`, replacing any previous entry with the same name.
    ///
    /// # Panics
    ///
    /// Panics if the package is the unnamed app package; the app is never
    /// looked up by name and does not belong in a catalog.
    pub fn insert(&mut self, package: Package) {
        let name = package
            .name()
            .expect("the app package cannot be cataloged")
            .to_string();
        self.packages.insert(name, package);
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl PackageCatalog for MemoryCatalog {
    fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(Package::new("jquery"));
        assert!(catalog.package("jquery").is_some());
        assert!(catalog.package("blaze").is_none());
    }

    #[test]
    #[should_panic(expected = "cannot be cataloged")]
    fn test_app_rejected() {
        MemoryCatalog::new().insert(Package::app());
    }
}
