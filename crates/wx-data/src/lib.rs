pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod gaps;
pub mod providers;
pub mod storage;

pub use batch::*;
pub use cache::*;
pub use catalog::*;
pub use config::*;
pub use providers::*;
pub use storage::*;

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use wx_types::{
    DataOrigin, DateRange, FieldCatalog, GapReport, HistoricalRequest, HistoricalResponse, HourlyDataset,
    HourlyRecord, Location, LocationId, PersistenceWarning, StoreResult, WxError, WxResult,
};

/// Stored history summary for one catalog location
#[derive(Debug, Clone, PartialEq)]
pub struct LocationStatistics {
    pub location_id: LocationId,
    pub name: String,
    pub record_count: u64,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

/// Data manager coordinates acquisition: store first, then the snapshot
/// cache, then the remote provider.
#[derive(Debug)]
pub struct DataManager {
    pub store: Arc<ObservationStore>,
    pub cache: Arc<SnapshotCache>,
    pub locations: Arc<dyn LocationRegistry>,
    pub provider: Arc<dyn WeatherProvider>,
    pub fields: Arc<FieldCatalog>,
    /// One gate per fingerprint with a remote fetch in progress.
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl DataManager {
    pub fn new(
        store: Arc<ObservationStore>,
        cache: Arc<SnapshotCache>,
        locations: Arc<dyn LocationRegistry>,
        provider: Arc<dyn WeatherProvider>,
        fields: Arc<FieldCatalog>,
    ) -> Self {
        Self {
            store,
            cache,
            locations,
            provider,
            fields,
            in_flight: DashMap::new(),
        }
    }

    /// Build the store and cache on one database connection.
    pub fn from_connection(
        connection: duckdb::Connection,
        cache_ttl: chrono::Duration,
        locations: Arc<dyn LocationRegistry>,
        provider: Arc<dyn WeatherProvider>,
        fields: Arc<FieldCatalog>,
    ) -> WxResult<Self> {
        let store_connection = connection.try_clone().map_err(storage::connection_error)?;
        let store = ObservationStore::new(store_connection)?;
        let cache = SnapshotCache::new(connection, cache_ttl)?;

        Ok(Self::new(Arc::new(store), Arc::new(cache), locations, provider, fields))
    }

    pub fn from_config(config: &DataConfig) -> WxResult<Self> {
        info!("Opening weather archive at {}", config.database_path.display());

        let fields = Arc::new(config.fields.clone());
        let provider = OpenMeteoProvider::new(&config.archive_url, config.request_timeout(), fields.clone())?;
        let locations = LocationCatalog::with_locations(config.locations.clone());

        Self::from_connection(
            storage::open_database(&config.database_path)?,
            config.cache_ttl(),
            Arc::new(locations),
            Arc::new(provider),
            fields,
        )
    }

    /// Hourly history for a request, filtered to the requested fields.
    pub async fn query_historical(&self, request: &HistoricalRequest) -> WxResult<HistoricalResponse> {
        request.validate()?;

        if let Some(location_id) = request.location_id {
            match self.stored_rows_if_complete(location_id, request) {
                Ok(Some(records)) => {
                    debug!("Store hit for location {} over {}: {} rows", location_id, request.range, records.len());
                    return Ok(Self::response(request, DataOrigin::Store, records, 0, 0, Vec::new()));
                }
                Ok(None) => {}
                Err(e) => warn!("Store pre-check failed for location {}, fetching remotely: {}", location_id, e),
            }
        }

        let fetch_fields = self.fetch_fields(request);
        let key = RequestShape::new(
            request.latitude,
            request.longitude,
            request.range,
            &fetch_fields,
            &request.timezone,
        )
        .fingerprint();

        if let Some(dataset) = self.cached_dataset(&key) {
            info!("Snapshot cache hit for {} over {}", key, request.range);
            return Ok(self.finish(request, dataset, DataOrigin::Cache));
        }

        let gate = self.in_flight.entry(key.clone()).or_default().value().clone();
        let fetched = {
            let _guard = gate.lock().await;
            // A concurrent identical request may have filled the cache while we waited.
            match self.cached_dataset(&key) {
                Some(dataset) => Ok((dataset, DataOrigin::Cache)),
                None => self
                    .fetch_remote(request, fetch_fields, &key)
                    .await
                    .map(|dataset| (dataset, DataOrigin::Remote)),
            }
        };
        drop(gate);
        self.in_flight.remove_if(&key, |_, gate| Arc::strong_count(gate) == 1);

        let (dataset, origin) = fetched?;
        Ok(self.finish(request, dataset, origin))
    }

    /// Persistent-mode query for a catalog location.
    pub async fn query_location(
        &self,
        location_id: LocationId,
        range: DateRange,
        fields: Vec<String>,
    ) -> WxResult<HistoricalResponse> {
        let location = self.locations.resolve(location_id)?;
        let request = HistoricalRequest::for_location(&location, range, fields);
        self.query_historical(&request).await
    }

    /// Point-mode query at each location's coordinates. Unknown locations
    /// and failed fetches are logged and left out; nothing is stored.
    pub async fn query_many(
        &self,
        location_ids: &[LocationId],
        range: DateRange,
        fields: &[String],
    ) -> WxResult<Vec<(Location, HistoricalResponse)>> {
        let mut results = Vec::with_capacity(location_ids.len());
        for &location_id in location_ids {
            let location = match self.locations.resolve(location_id) {
                Ok(location) => location,
                Err(e) => {
                    warn!("Skipping location {}: {}", location_id, e);
                    continue;
                }
            };

            let request = HistoricalRequest::at_point(
                location.longitude,
                location.latitude,
                &location.timezone,
                range,
                fields.to_vec(),
            );
            match self.query_historical(&request).await {
                Ok(response) => results.push((location, response)),
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => error!("Query for {} over {} failed: {}", location, range, e),
            }
        }

        info!("Multi-location query returned {}/{} locations", results.len(), location_ids.len());
        Ok(results)
    }

    /// Day-level gaps and hour-level completeness of the stored history.
    pub fn check_completeness(&self, location_id: LocationId, range: DateRange) -> WxResult<GapReport> {
        range.validate()?;
        let location = self.locations.resolve(location_id)?;
        let rows = self.store.query(location.id, range.first_hour(), range.last_hour())?;
        let timestamps: Vec<NaiveDateTime> = rows.iter().map(|o| o.timestamp).collect();

        let report = gaps::analyze(location.id, range, &timestamps);
        info!(
            "Completeness of {} over {}: {}% ({} missing ranges)",
            location,
            range,
            report.completeness_rate,
            report.missing_ranges.len()
        );
        Ok(report)
    }

    /// Delete stored hours between the given days (inclusive). Without any
    /// bound nothing is deleted.
    pub fn delete(&self, location_id: LocationId, start: Option<NaiveDate>, end: Option<NaiveDate>) -> WxResult<usize> {
        if let (Some(start), Some(end)) = (start, end) {
            DateRange::new(start, end)?;
        }
        let from = start.map(|d| d.and_time(NaiveTime::MIN));
        let to = end.and_then(|d| d.and_hms_opt(23, 59, 59));
        Ok(self.store.range_delete(location_id, from, to)?)
    }

    /// Delete every stored hour of a location.
    pub fn purge_location(&self, location_id: LocationId) -> WxResult<usize> {
        warn!("Purging all stored observations of location {}", location_id);
        Ok(self.store.purge_location(location_id)?)
    }

    /// Record counts and spans for every catalog location.
    pub fn statistics(&self) -> WxResult<Vec<LocationStatistics>> {
        let stored = self.store.location_stats()?;
        let statistics = self
            .locations
            .all()
            .into_iter()
            .map(|location| {
                let stats = stored
                    .iter()
                    .find(|(id, _)| *id == location.id)
                    .map(|(_, s)| s.clone())
                    .unwrap_or_default();
                LocationStatistics {
                    location_id: location.id,
                    name: location.name,
                    record_count: stats.count,
                    earliest: stats.min_timestamp,
                    latest: stats.max_timestamp,
                }
            })
            .collect();
        Ok(statistics)
    }

    /// Stored rows when they fully cover the request, `None` otherwise.
    fn stored_rows_if_complete(
        &self,
        location_id: LocationId,
        request: &HistoricalRequest,
    ) -> StoreResult<Option<Vec<HourlyRecord>>> {
        let rows = self
            .store
            .query(location_id, request.range.first_hour(), request.range.last_hour())?;

        let expected = request.range.expected_hours();
        if rows.len() < expected {
            info!("Store incomplete for location {}: {}/{} hours", location_id, rows.len(), expected);
            return Ok(None);
        }

        if let Some(field) = request
            .fields
            .iter()
            .find(|field| !rows.iter().any(|o| o.has_value(field)))
        {
            info!("Store has no values for '{}' at location {}", field, location_id);
            return Ok(None);
        }

        Ok(Some(
            rows.iter()
                .map(|o| o.to_record().project(&request.fields))
                .collect(),
        ))
    }

    /// Persistent requests fetch the whole catalog so one call serves later
    /// requests for other fields.
    fn fetch_fields(&self, request: &HistoricalRequest) -> Vec<String> {
        let mut fields = if request.is_persistent() {
            self.fields.names()
        } else {
            Vec::new()
        };
        for field in &request.fields {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    fn cached_dataset(&self, key: &str) -> Option<HourlyDataset> {
        match self.cache.get::<HourlyDataset>(key) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!("Snapshot cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn fetch_remote(
        &self,
        request: &HistoricalRequest,
        fields: Vec<String>,
        key: &str,
    ) -> WxResult<HourlyDataset> {
        let query = ProviderQuery {
            latitude: request.latitude,
            longitude: request.longitude,
            start: request.range.start,
            end: request.range.end,
            fields,
            timezone: request.timezone.clone(),
        };

        let dataset = self.provider.fetch_hourly(&query).await.map_err(|e| {
            error!(kind = e.kind(), "{} request over {} failed: {}", self.provider.name(), request.range, e);
            WxError::from(e)
        })?;

        if let Err(e) = self.cache.put_default(key, &dataset) {
            warn!("Failed to cache snapshot {}: {}", key, e);
        }
        Ok(dataset)
    }

    /// Merge into the store (persistent mode) and filter down to the
    /// requested fields.
    fn finish(&self, request: &HistoricalRequest, dataset: HourlyDataset, origin: DataOrigin) -> HistoricalResponse {
        let mut persisted = 0;
        let mut warnings = Vec::new();

        if let Some(location_id) = request.location_id {
            match self.store.upsert_records(location_id, &dataset.records) {
                Ok(count) => {
                    persisted = count;
                    info!("Saved {} observations for location {}", count, location_id);
                }
                Err(e) => {
                    warn!("Saving observations for location {} failed (data still returned): {}", location_id, e);
                    warnings.push(PersistenceWarning {
                        location_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        let fetched = dataset.records.len();
        let records = dataset
            .records
            .iter()
            .map(|r| r.project(&request.fields))
            .collect();

        Self::response(request, origin, records, fetched, persisted, warnings)
    }

    fn response(
        request: &HistoricalRequest,
        origin: DataOrigin,
        records: Vec<HourlyRecord>,
        fetched: usize,
        persisted: usize,
        warnings: Vec<PersistenceWarning>,
    ) -> HistoricalResponse {
        HistoricalResponse {
            latitude: request.latitude,
            longitude: request.longitude,
            timezone: request.timezone.clone(),
            origin,
            records,
            fetched,
            persisted,
            warnings,
        }
    }
}
