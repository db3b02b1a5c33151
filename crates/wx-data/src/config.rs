use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wx_types::{config_error, default_fields, FieldCatalog, Location, WxError, WxResult};

pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Upper bound for `cache_ttl_hours` (100 years).
pub const MAX_CACHE_TTL_HOURS: i64 = 24 * 365 * 100;

/// Upper bound for `provider_lag_days` and `refresh_days_back`.
pub const MAX_WINDOW_DAYS: i64 = 365 * 100;

/// Runtime configuration of the acquisition engine.
///
/// Example TOML:
/// ```toml
/// archive_url = "https://archive-api.open-meteo.com/v1/archive"
/// cache_ttl_hours = 720
///
/// [[locations]]
/// id = 1
/// name = "Nanning"
/// longitude = 108.3661
/// latitude = 22.8172
/// timezone = "Asia/Shanghai"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub database_path: PathBuf,
    pub archive_url: String,
    pub request_timeout_secs: u64,
    /// Historical data for past dates does not change, so this is long.
    pub cache_ttl_hours: i64,
    pub default_timezone: String,
    pub batch_concurrency: usize,
    /// How many days the archive trails real time.
    pub provider_lag_days: i64,
    pub refresh_days_back: i64,
    pub default_fields: Vec<String>,
    pub fields: FieldCatalog,
    pub locations: Vec<Location>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("weather.duckdb"),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            request_timeout_secs: 30,
            cache_ttl_hours: 720,
            default_timezone: "Asia/Shanghai".to_string(),
            batch_concurrency: 4,
            provider_lag_days: 5,
            refresh_days_back: 7,
            default_fields: default_fields(),
            fields: FieldCatalog::default(),
            locations: default_locations(),
        }
    }
}

impl DataConfig {
    /// Load from a TOML file; a missing file yields the defaults. Environment
    /// overrides are applied on top either way.
    pub fn load<P: AsRef<Path>>(path: P) -> WxResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)
                .map_err(|e| config_error!("failed to parse {}: {}", path.display(), e))?
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> WxResult<Self> {
        toml::from_str(contents).map_err(|e| config_error!("{}", e))
    }

    pub fn apply_env_overrides(&mut self) -> WxResult<()> {
        if let Ok(path) = std::env::var("WX_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("WX_ARCHIVE_URL") {
            self.archive_url = url;
        }
        if let Ok(ttl) = std::env::var("WX_CACHE_TTL_HOURS") {
            self.cache_ttl_hours = ttl
                .parse()
                .map_err(|_| config_error!("WX_CACHE_TTL_HOURS must be an integer, got '{}'", ttl))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> WxResult<()> {
        if self.batch_concurrency == 0 {
            return Err(config_error!("batch_concurrency must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(config_error!("request_timeout_secs must be at least 1"));
        }
        if !(0..=MAX_CACHE_TTL_HOURS).contains(&self.cache_ttl_hours) {
            return Err(config_error!(
                "cache_ttl_hours must be between 0 and {}, got {}",
                MAX_CACHE_TTL_HOURS,
                self.cache_ttl_hours
            ));
        }
        for (name, days) in [
            ("provider_lag_days", self.provider_lag_days),
            ("refresh_days_back", self.refresh_days_back),
        ] {
            if !(0..=MAX_WINDOW_DAYS).contains(&days) {
                return Err(config_error!("{} must be between 0 and {}, got {}", name, MAX_WINDOW_DAYS, days));
            }
        }
        let dupes = self.fields.duplicates();
        if !dupes.is_empty() {
            return Err(config_error!("duplicate field or wire names: {}", dupes.join(", ")));
        }
        let mut ids = HashSet::new();
        for location in &self.locations {
            if !ids.insert(location.id) {
                return Err(WxError::Config(format!("duplicate location id {}", location.id)));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours.clamp(0, MAX_CACHE_TTL_HOURS))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Platform data directory for the archive database
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wxarchive")
}

/// Regional seed list used when no locations are configured
pub fn default_locations() -> Vec<Location> {
    const TZ: &str = "Asia/Shanghai";
    [
        (1, "Nanning", 108.3661, 22.8172, "Guangxi"),
        (2, "Liuzhou", 109.4281, 24.3264, "Guangxi"),
        (3, "Guilin", 110.2993, 25.2736, "Guangxi"),
        (4, "Wuzhou", 111.2742, 23.4769, "Guangxi"),
        (5, "Beihai", 109.1195, 21.4733, "Guangxi"),
        (6, "Fangchenggang", 108.3548, 21.6146, "Guangxi"),
        (7, "Qinzhou", 108.6544, 21.9797, "Guangxi"),
        (8, "Guigang", 109.5986, 23.1115, "Guangxi"),
        (9, "Yulin", 110.1810, 22.6542, "Guangxi"),
        (10, "Baise", 106.6183, 23.9015, "Guangxi"),
        (11, "Hezhou", 111.5669, 24.4038, "Guangxi"),
        (12, "Hechi", 108.0854, 24.6928, "Guangxi"),
        (13, "Laibin", 109.2211, 23.7509, "Guangxi"),
        (14, "Chongzuo", 107.3645, 22.3769, "Guangxi"),
        (101, "Beijing", 116.4074, 39.9042, "Beijing"),
        (102, "Shanghai", 121.4737, 31.2304, "Shanghai"),
        (103, "Guangzhou", 113.2644, 23.1291, "Guangdong"),
        (104, "Shenzhen", 114.0579, 22.5431, "Guangdong"),
        (105, "Chengdu", 104.0665, 30.5723, "Sichuan"),
        (106, "Hangzhou", 120.1551, 30.2741, "Zhejiang"),
    ]
    .into_iter()
    .map(|(id, name, lon, lat, region)| Location::new(id, name, lon, lat, TZ).with_region(region))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DataConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache_ttl().num_days(), 30);
        assert_eq!(config.fields.wire_name("evapotranspiration"), "et0_fao_evapotranspiration");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DataConfig::from_toml(
            r#"
            database_path = "/tmp/wx/weather.duckdb"
            batch_concurrency = 2

            [[locations]]
            id = 42
            name = "Ningming"
            longitude = 107.07
            latitude = 22.14
            timezone = "Asia/Shanghai"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_concurrency, 2);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.locations.len(), 1);
        assert_eq!(config.locations[0].region, None);
        assert_eq!(config.fields.len(), FieldCatalog::default().len());
    }

    #[test]
    fn test_custom_field_catalog() {
        let config = DataConfig::from_toml(
            r#"
            [[fields]]
            name = "evapotranspiration"
            wire_name = "et0_fao_evapotranspiration"
            unit = "mm"
            category = "other"
            "#,
        )
        .unwrap();
        assert_eq!(config.fields.len(), 1);
        assert_eq!(config.fields.field_name("et0_fao_evapotranspiration"), "evapotranspiration");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DataConfig::default();
        config.batch_concurrency = 0;
        assert!(matches!(config.validate(), Err(WxError::Config(_))));

        let mut config = DataConfig::default();
        config.locations.push(config.locations[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_durations() {
        let mut config = DataConfig::default();
        config.cache_ttl_hours = i64::MAX;
        assert!(matches!(config.validate(), Err(WxError::Config(_))));
        assert_eq!(config.cache_ttl().num_hours(), MAX_CACHE_TTL_HOURS);

        let mut config = DataConfig::default();
        config.refresh_days_back = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = DataConfig::default();
        config.provider_lag_days = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::load(dir.path().join("absent.toml")).unwrap();
        assert!(!config.archive_url.is_empty());
        assert!(!config.locations.is_empty());
    }
}
