use std::collections::HashMap;

use parking_lot::RwLock;
use wx_types::{Location, LocationId, WxError, WxResult};

/// Keyed lookup of known locations
pub trait LocationRegistry: Send + Sync + std::fmt::Debug {
    /// Coordinates and timezone of a location, `NotFound` when unknown.
    fn resolve(&self, id: LocationId) -> WxResult<Location>;

    /// Every known location, ordered by id.
    fn all(&self) -> Vec<Location>;
}

/// In-memory location catalog
#[derive(Debug, Default)]
pub struct LocationCatalog {
    locations: RwLock<HashMap<LocationId, Location>>,
}

impl LocationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let catalog = Self::new();
        for location in locations {
            catalog.register(location);
        }
        catalog
    }

    /// Add or replace a location, returning the previous entry.
    pub fn register(&self, location: Location) -> Option<Location> {
        tracing::debug!("Registered location {} at ({}, {})", location, location.longitude, location.latitude);
        self.locations.write().insert(location.id, location)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Location> {
        self.locations
            .read()
            .values()
            .find(|l| l.name == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.locations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.read().is_empty()
    }
}

impl LocationRegistry for LocationCatalog {
    fn resolve(&self, id: LocationId) -> WxResult<Location> {
        self.locations
            .read()
            .get(&id)
            .cloned()
            .ok_or(WxError::NotFound { location_id: id })
    }

    fn all(&self) -> Vec<Location> {
        let mut locations: Vec<Location> = self.locations.read().values().cloned().collect();
        locations.sort_by_key(|l| l.id);
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_and_not_found() {
        let catalog = LocationCatalog::with_locations(vec![
            Location::new(2, "Liuzhou", 109.4281, 24.3264, "Asia/Shanghai"),
            Location::new(1, "Nanning", 108.3661, 22.8172, "Asia/Shanghai"),
        ]);

        let nanning = catalog.resolve(LocationId(1)).unwrap();
        assert_eq!(nanning.name, "Nanning");
        assert!(matches!(
            catalog.resolve(LocationId(99)),
            Err(WxError::NotFound { location_id: LocationId(99) })
        ));

        let ids: Vec<_> = catalog.all().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![LocationId(1), LocationId(2)]);
        assert_eq!(catalog.find_by_name("Liuzhou").map(|l| l.id), Some(LocationId(2)));
    }

    #[test]
    fn test_register_replaces() {
        let catalog = LocationCatalog::new();
        assert!(catalog.register(Location::new(5, "Beihai", 109.1195, 21.4733, "Asia/Shanghai")).is_none());
        let previous = catalog.register(Location::new(5, "Beihai", 109.12, 21.47, "Asia/Shanghai"));
        assert!(previous.is_some());
        assert_eq!(catalog.len(), 1);
    }
}
