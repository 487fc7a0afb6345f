use std::collections::HashMap;

use oblipass_core::location::{GeoResolver, LocationDescriptor};

/// Resolver for deployments without a GeoIP database: every address maps to
/// the unknown descriptor, so location tracking degrades to a single bucket
/// instead of failing.
#[derive(Debug, Default)]
pub struct UnknownGeoResolver;

impl GeoResolver for UnknownGeoResolver {
    fn resolve(&self, _address: &str) -> LocationDescriptor {
        LocationDescriptor::unknown()
    }
}

/// Table-driven resolver for fixed topologies and tests. Addresses missing
/// from the table resolve to the unknown descriptor.
#[derive(Debug, Default)]
pub struct TableGeoResolver {
    entries: HashMap<String, LocationDescriptor>,
}

impl TableGeoResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: impl Into<String>, descriptor: LocationDescriptor) {
        self.entries.insert(address.into(), descriptor);
    }
}

impl GeoResolver for TableGeoResolver {
    fn resolve(&self, address: &str) -> LocationDescriptor {
        self.entries
            .get(address)
            .cloned()
            .unwrap_or_else(LocationDescriptor::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::{TableGeoResolver, UnknownGeoResolver};
    use oblipass_core::location::{GeoResolver, LocationDescriptor};

    #[test]
    fn unknown_resolver_never_places_an_address() {
        let resolver = UnknownGeoResolver;
        assert_eq!(
            resolver.resolve("203.0.113.9").display_text,
            "Unknown Location"
        );
    }

    #[test]
    fn table_resolver_falls_back_to_unknown() {
        let mut resolver = TableGeoResolver::new();
        resolver.insert(
            "203.0.113.9",
            LocationDescriptor::compose(Some("PE".to_string()), Vec::new(), Some("Lima".to_string())),
        );
        assert_eq!(resolver.resolve("203.0.113.9").display_text, "Lima, PE");
        assert_eq!(resolver.resolve("198.51.100.7").display_text, "Unknown Location");
    }
}
