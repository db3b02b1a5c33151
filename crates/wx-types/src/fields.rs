use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Grouping of fetchable fields, mirrors the provider's variable families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Basic,
    Wind,
    Radiation,
    Other,
}

/// One fetchable weather field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Parameter name on the provider side when it differs from `name`.
    #[serde(default)]
    pub wire_name: Option<String>,
    #[serde(default)]
    pub unit: String,
    pub category: FieldCategory,
}

impl FieldSpec {
    pub fn new(name: &str, unit: &str, category: FieldCategory) -> Self {
        Self {
            name: name.to_string(),
            wire_name: None,
            unit: unit.to_string(),
            category,
        }
    }

    pub fn with_wire_name(mut self, wire_name: &str) -> Self {
        self.wire_name = Some(wire_name.to_string());
        self
    }

    pub fn wire(&self) -> &str {
        self.wire_name.as_deref().unwrap_or(&self.name)
    }
}

/// Full catalog of fetchable fields with a two-way wire name lookup
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCatalog {
    specs: Vec<FieldSpec>,
    to_wire: HashMap<String, String>,
    from_wire: HashMap<String, String>,
}

impl FieldCatalog {
    pub fn new(specs: Vec<FieldSpec>) -> Self {
        let mut to_wire = HashMap::new();
        let mut from_wire = HashMap::new();
        for spec in &specs {
            to_wire.insert(spec.name.clone(), spec.wire().to_string());
            from_wire.insert(spec.wire().to_string(), spec.name.clone());
        }
        Self {
            specs,
            to_wire,
            from_wire,
        }
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    /// Field names in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.to_wire.contains_key(field)
    }

    /// Provider parameter for a field. Unknown fields pass through unchanged.
    pub fn wire_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.to_wire.get(field).map(String::as_str).unwrap_or(field)
    }

    /// Field name for a provider parameter. Unknown names pass through unchanged.
    pub fn field_name<'a>(&'a self, wire: &'a str) -> &'a str {
        self.from_wire.get(wire).map(String::as_str).unwrap_or(wire)
    }

    pub fn by_category(&self, category: FieldCategory) -> impl Iterator<Item = &FieldSpec> {
        self.specs.iter().filter(move |s| s.category == category)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Names or wire names that occur more than once.
    pub fn duplicates(&self) -> Vec<String> {
        let mut dupes = Vec::new();
        if self.to_wire.len() != self.specs.len() || self.from_wire.len() != self.specs.len() {
            let mut seen_names = HashMap::new();
            let mut seen_wires = HashMap::new();
            for spec in &self.specs {
                if seen_names.insert(spec.name.as_str(), ()).is_some() {
                    dupes.push(spec.name.clone());
                }
                if seen_wires.insert(spec.wire(), ()).is_some() {
                    dupes.push(spec.wire().to_string());
                }
            }
        }
        dupes
    }
}

impl Default for FieldCatalog {
    fn default() -> Self {
        use FieldCategory::*;
        Self::new(vec![
            FieldSpec::new("temperature_2m", "°C", Basic),
            FieldSpec::new("relative_humidity_2m", "%", Basic),
            FieldSpec::new("dew_point_2m", "°C", Basic),
            FieldSpec::new("precipitation", "mm", Basic),
            FieldSpec::new("rain", "mm", Basic),
            FieldSpec::new("snowfall", "cm", Basic),
            FieldSpec::new("surface_pressure", "hPa", Basic),
            FieldSpec::new("cloud_cover", "%", Basic),
            FieldSpec::new("weather_code", "wmo code", Basic),
            FieldSpec::new("wind_speed_10m", "km/h", Wind),
            FieldSpec::new("wind_direction_10m", "°", Wind),
            FieldSpec::new("wind_gusts_10m", "km/h", Wind),
            FieldSpec::new("wind_speed_100m", "km/h", Wind),
            FieldSpec::new("wind_direction_100m", "°", Wind),
            FieldSpec::new("shortwave_radiation", "W/m²", Radiation),
            FieldSpec::new("direct_radiation", "W/m²", Radiation),
            FieldSpec::new("diffuse_radiation", "W/m²", Radiation),
            FieldSpec::new("direct_normal_irradiance", "W/m²", Radiation),
            FieldSpec::new("evapotranspiration", "mm", Other).with_wire_name("et0_fao_evapotranspiration"),
            FieldSpec::new("soil_temperature_0_to_7cm", "°C", Other),
            FieldSpec::new("soil_moisture_0_to_7cm", "m³/m³", Other),
        ])
    }
}

impl Serialize for FieldCatalog {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.specs.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldCatalog {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<FieldSpec>::deserialize(deserializer).map(FieldCatalog::new)
    }
}

/// Fields returned when a caller does not pick any
pub fn default_fields() -> Vec<String> {
    [
        "temperature_2m",
        "relative_humidity_2m",
        "precipitation",
        "wind_speed_10m",
        "wind_direction_10m",
        "shortwave_radiation",
        "weather_code",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_mapping_both_directions() {
        let catalog = FieldCatalog::default();
        assert_eq!(catalog.wire_name("evapotranspiration"), "et0_fao_evapotranspiration");
        assert_eq!(catalog.field_name("et0_fao_evapotranspiration"), "evapotranspiration");
        assert_eq!(catalog.wire_name("temperature_2m"), "temperature_2m");
        assert_eq!(catalog.wire_name("visibility"), "visibility");
    }

    #[test]
    fn test_default_catalog_has_no_duplicates() {
        let catalog = FieldCatalog::default();
        assert!(catalog.duplicates().is_empty());
        assert_eq!(catalog.by_category(FieldCategory::Radiation).count(), 4);
        for field in default_fields() {
            assert!(catalog.contains(&field), "{} missing from catalog", field);
        }
    }

    #[test]
    fn test_duplicate_detection() {
        let catalog = FieldCatalog::new(vec![
            FieldSpec::new("rain", "mm", FieldCategory::Basic),
            FieldSpec::new("rain_total", "mm", FieldCategory::Basic).with_wire_name("rain"),
        ]);
        assert_eq!(catalog.duplicates(), vec!["rain".to_string()]);
    }
}
