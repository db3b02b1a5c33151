use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use duckdb::{params, Connection, OptionalExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use wx_types::{DateRange, StoreError, StoreResult};

use crate::storage::{connection_error, open_database, open_in_memory, query_error};

/// Shape of a provider request, the input to the cache fingerprint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestShape {
    pub latitude: f64,
    pub longitude: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Sorted and de-duplicated.
    pub fields: Vec<String>,
    pub timezone: String,
}

impl RequestShape {
    pub fn new(latitude: f64, longitude: f64, range: DateRange, fields: &[String], timezone: &str) -> Self {
        let mut fields = fields.to_vec();
        fields.sort();
        fields.dedup();
        Self {
            latitude,
            longitude,
            start: range.start,
            end: range.end,
            fields,
            timezone: timezone.to_string(),
        }
    }

    /// Hex SHA-256 over the canonical JSON form (object keys sorted).
    pub fn fingerprint(&self) -> String {
        // serde_json::Value keeps object keys in sorted order
        let canonical = serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{digest:x}")
    }
}

/// In-process counters
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Entry counts as seen in the cache table
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatus {
    pub total: u64,
    pub valid: u64,
    pub expired: u64,
    pub ttl_hours: i64,
}

/// Fingerprint to payload cache with explicit expiry.
///
/// Entries are replaced wholesale on `put`. Expired entries read as absent
/// and are deleted on the read that notices them.
#[derive(Debug)]
pub struct SnapshotCache {
    connection: Mutex<Connection>,
    default_ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl SnapshotCache {
    pub fn new(connection: Connection, default_ttl: Duration) -> StoreResult<Self> {
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS api_cache (
                    cache_key VARCHAR PRIMARY KEY,
                    payload VARCHAR NOT NULL,
                    created_at BIGINT NOT NULL,
                    expires_at BIGINT NOT NULL
                );",
            )
            .map_err(connection_error)?;

        Ok(Self {
            connection: Mutex::new(connection),
            default_ttl,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, default_ttl: Duration) -> StoreResult<Self> {
        Self::new(open_database(path)?, default_ttl)
    }

    pub fn in_memory(default_ttl: Duration) -> StoreResult<Self> {
        Self::new(open_in_memory()?, default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        const SELECT_SQL: &str = "SELECT payload, expires_at FROM api_cache WHERE cache_key = ?";
        const EXPIRE_SQL: &str = "DELETE FROM api_cache WHERE cache_key = ? AND expires_at <= ?";

        let now = Utc::now().timestamp_micros();
        let conn = self.connection.lock();
        let row: Option<(String, i64)> = conn
            .query_row(SELECT_SQL, params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(|e| query_error(SELECT_SQL, e))?;

        let Some((payload, expires_at)) = row else {
            self.stats.write().misses += 1;
            tracing::debug!("Cache miss: {}", key);
            return Ok(None);
        };

        if expires_at <= now {
            // A concurrent reader may already have removed it; that is fine.
            conn.execute(EXPIRE_SQL, params![key, now])
                .map_err(|e| query_error(EXPIRE_SQL, e))?;
            let mut stats = self.stats.write();
            stats.misses += 1;
            stats.expired += 1;
            tracing::debug!("Cache entry expired: {}", key);
            return Ok(None);
        }

        match serde_json::from_str(&payload) {
            Ok(value) => {
                self.stats.write().hits += 1;
                tracing::debug!("Cache hit: {}", key);
                Ok(Some(value))
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                conn.execute("DELETE FROM api_cache WHERE cache_key = ?", params![key])
                    .map_err(connection_error)?;
                self.stats.write().misses += 1;
                Ok(None)
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> StoreResult<()> {
        const UPSERT_SQL: &str = "INSERT INTO api_cache (cache_key, payload, created_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (cache_key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at";

        let payload = serde_json::to_string(value).map_err(|e| StoreError::Encoding { message: e.to_string() })?;
        let created_at = Utc::now();
        let expires_at = created_at.checked_add_signed(ttl).ok_or_else(|| StoreError::Encoding {
            message: format!("cache ttl of {} hours is out of range", ttl.num_hours()),
        })?;

        self.connection
            .lock()
            .execute(
                UPSERT_SQL,
                params![key, payload, created_at.timestamp_micros(), expires_at.timestamp_micros()],
            )
            .map_err(|e| query_error(UPSERT_SQL, e))?;

        self.stats.write().stores += 1;
        tracing::debug!("Cached {} until {}", key, expires_at);
        Ok(())
    }

    pub fn put_default<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        self.put(key, value, self.default_ttl)
    }

    /// Delete every expired entry.
    pub fn sweep_expired(&self) -> StoreResult<usize> {
        const SQL: &str = "DELETE FROM api_cache WHERE expires_at <= ?";
        let removed = self
            .connection
            .lock()
            .execute(SQL, params![Utc::now().timestamp_micros()])
            .map_err(|e| query_error(SQL, e))?;
        self.stats.write().expired += removed as u64;
        tracing::info!("Swept {} expired cache entries", removed);
        Ok(removed)
    }

    pub fn clear_all(&self) -> StoreResult<usize> {
        const SQL: &str = "DELETE FROM api_cache";
        let removed = self
            .connection
            .lock()
            .execute(SQL, [])
            .map_err(|e| query_error(SQL, e))?;
        *self.stats.write() = CacheStats::default();
        tracing::info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    pub fn status(&self) -> StoreResult<CacheStatus> {
        const SQL: &str = "SELECT COUNT(*), COUNT(*) FILTER (WHERE expires_at > ?) FROM api_cache";
        let (total, valid): (i64, i64) = self
            .connection
            .lock()
            .query_row(SQL, params![Utc::now().timestamp_micros()], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| query_error(SQL, e))?;

        Ok(CacheStatus {
            total: total as u64,
            valid: valid as u64,
            expired: (total - valid) as u64,
            ttl_hours: self.default_ttl.num_hours(),
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    /// Expiry of an entry, if present (expired or not).
    pub fn expires_at(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        const SQL: &str = "SELECT expires_at FROM api_cache WHERE cache_key = ?";
        let micros: Option<i64> = self
            .connection
            .lock()
            .query_row(SQL, params![key], |row| row.get(0))
            .optional()
            .map_err(|e| query_error(SQL, e))?;
        Ok(micros.and_then(DateTime::<Utc>::from_timestamp_micros))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        rows: Vec<u32>,
    }

    fn shape(fields: &[&str]) -> RequestShape {
        let range = DateRange::parse("2024-01-01", "2024-01-31").unwrap();
        let fields: Vec<String> = fields.iter().map(|s| s.to_string()).collect();
        RequestShape::new(22.8172, 108.3661, range, &fields, "Asia/Shanghai")
    }

    #[test]
    fn test_fingerprint_ignores_field_order() {
        let a = shape(&["temperature_2m", "rain", "cloud_cover"]);
        let b = shape(&["cloud_cover", "temperature_2m", "rain", "rain"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        assert!(a
            .fingerprint()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let a = shape(&["temperature_2m", "rain"]);
        let b = shape(&["temperature_2m", "snowfall"]);
        assert_ne!(a.fingerprint(), b.fingerprint());

        let mut moved = shape(&["temperature_2m", "rain"]);
        moved.timezone = "UTC".to_string();
        assert_ne!(a.fingerprint(), moved.fingerprint());
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = SnapshotCache::in_memory(Duration::hours(720)).unwrap();
        let payload = Payload { rows: vec![1, 2, 3] };

        assert!(cache.get::<Payload>("k1").unwrap().is_none());
        cache.put_default("k1", &payload).unwrap();
        assert_eq!(cache.get::<Payload>("k1").unwrap(), Some(payload));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let cache = SnapshotCache::in_memory(Duration::hours(1)).unwrap();
        cache.put_default("k", &Payload { rows: vec![1, 2] }).unwrap();
        cache.put_default("k", &Payload { rows: vec![9] }).unwrap();
        assert_eq!(cache.get::<Payload>("k").unwrap(), Some(Payload { rows: vec![9] }));
        assert_eq!(cache.status().unwrap().total, 1);
    }

    #[test]
    fn test_zero_ttl_is_absent_and_removed() {
        let cache = SnapshotCache::in_memory(Duration::hours(720)).unwrap();
        cache.put("k", &Payload { rows: vec![1] }, Duration::zero()).unwrap();

        assert!(cache.get::<Payload>("k").unwrap().is_none());
        assert_eq!(cache.status().unwrap().total, 0);
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn test_out_of_range_ttl_is_rejected() {
        let cache = SnapshotCache::in_memory(Duration::hours(720)).unwrap();
        let result = cache.put("k", &Payload { rows: vec![1] }, Duration::days(1_000_000_000));

        assert!(matches!(result, Err(StoreError::Encoding { .. })));
        assert_eq!(cache.status().unwrap().total, 0);
    }

    #[test]
    fn test_sweep_and_clear() {
        let cache = SnapshotCache::in_memory(Duration::hours(720)).unwrap();
        cache.put("old-1", &Payload { rows: vec![] }, Duration::zero()).unwrap();
        cache.put("old-2", &Payload { rows: vec![] }, Duration::zero()).unwrap();
        cache.put_default("fresh", &Payload { rows: vec![] }).unwrap();

        let status = cache.status().unwrap();
        assert_eq!(status.total, 3);
        assert_eq!(status.expired, 2);
        assert_eq!(status.ttl_hours, 720);

        assert_eq!(cache.sweep_expired().unwrap(), 2);
        assert!(cache.expires_at("fresh").unwrap().is_some());
        assert_eq!(cache.clear_all().unwrap(), 1);
        assert_eq!(cache.status().unwrap().total, 0);
    }
}
