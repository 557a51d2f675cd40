//! Entity discovery.
//!
//! Rust has no runtime type registry, so the application lists its candidate
//! types explicitly (see [`crate::domain::candidates`]) and the scanner keeps
//! the ones a session factory can map.

use hiberlite_core::EntityDescriptor;

/// Filters candidate descriptors down to mappable entities of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityScanner {
    package: String,
}

impl EntityScanner {
    /// Scanner for `package` and its submodules.
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }

    /// The scanned package.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Candidates that live in the package, are tagged as entities, and
    /// declare no generic type parameters, in candidate order.
    pub fn scan(&self, candidates: &[EntityDescriptor]) -> Vec<EntityDescriptor> {
        let found: Vec<EntityDescriptor> = candidates
            .iter()
            .filter(|d| {
                if !d.in_package(&self.package) {
                    return false;
                }
                if !d.is_entity {
                    tracing::trace!(name = %d.qualified_name(), "Skipping non-entity");
                    return false;
                }
                // generic types can only be mapped through a concrete subtype
                if d.is_generic() {
                    tracing::debug!(name = %d.qualified_name(), "Skipping generic entity");
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        tracing::debug!(
            package = %self.package,
            candidates = candidates.len(),
            entities = found.len(),
            "Scanned for entities"
        );
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(found: &[EntityDescriptor]) -> Vec<&str> {
        found.iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_scan_filters_package_tag_and_generics() {
        let candidates = [
            EntityDescriptor::declared("Order", "app::model").entity(true),
            EntityDescriptor::declared("Line", "app::model::lines").entity(true),
            EntityDescriptor::declared("Money", "app::model"),
            EntityDescriptor::declared("Page", "app::model").entity(true).type_params(1),
            EntityDescriptor::declared("Report", "app::reports").entity(true),
            EntityDescriptor::declared("Stray", "app::modeling").entity(true),
        ];
        let found = EntityScanner::new("app::model").scan(&candidates);
        assert_eq!(names(&found), vec!["Order", "Line"]);
    }

    #[test]
    fn test_scan_of_empty_package_finds_nothing() {
        let candidates = [EntityDescriptor::declared("Order", "app::model").entity(true)];
        assert!(EntityScanner::new("other").scan(&candidates).is_empty());
    }
}
