use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;
use wx_types::{BatchOutcome, BatchReport, DataOrigin, DateRange, HistoricalRequest, LocationId, WxError, WxResult};

use crate::{DataConfig, DataManager};

/// Runs backfills over many locations with bounded concurrency.
///
/// A failing location never aborts the batch; it is reported in its own
/// [`BatchOutcome`] and the rest carry on.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    manager: Arc<DataManager>,
    concurrency: usize,
    days_back: i64,
    provider_lag: i64,
}

impl BatchCoordinator {
    pub fn new(manager: Arc<DataManager>, concurrency: usize) -> Self {
        Self {
            manager,
            concurrency: concurrency.max(1),
            days_back: 7,
            provider_lag: 5,
        }
    }

    pub fn from_config(manager: Arc<DataManager>, config: &DataConfig) -> Self {
        Self::new(manager, config.batch_concurrency).with_refresh_window(config.refresh_days_back, config.provider_lag_days)
    }

    pub fn with_refresh_window(mut self, days_back: i64, provider_lag: i64) -> Self {
        self.days_back = days_back;
        self.provider_lag = provider_lag;
        self
    }

    /// Backfill one location over `range` through the normal query path.
    pub async fn backfill_location(&self, location_id: LocationId, range: DateRange, fields: &[String]) -> BatchOutcome {
        let location = match self.manager.locations.resolve(location_id) {
            Ok(location) => location,
            Err(e) => {
                warn!("Skipping location {}: {}", location_id, e);
                return BatchOutcome::failed(location_id, Some(range), e.to_string());
            }
        };

        let request = HistoricalRequest::for_location(&location, range, fields.to_vec());
        match self.manager.query_historical(&request).await {
            Ok(response) => {
                let mut outcome = BatchOutcome::succeeded(
                    location.id,
                    Some(location.name.clone()),
                    range,
                    response.fetched,
                    response.persisted,
                );
                if response.origin == DataOrigin::Store {
                    outcome.message = format!("already stored ({} rows)", response.records.len());
                }
                for warning in &response.warnings {
                    outcome.message.push_str(&format!("; {}", warning));
                }
                info!("{}: {}", location, outcome.message);
                outcome
            }
            Err(e) => {
                error!("Backfill of {} over {} failed: {}", location, range, e);
                let mut outcome = BatchOutcome::failed(location.id, Some(range), e.to_string());
                outcome.location_name = Some(location.name);
                outcome
            }
        }
    }

    /// Backfill every location over the same range. Outcomes keep the order
    /// of `location_ids`.
    pub async fn backfill(&self, location_ids: &[LocationId], range: DateRange, fields: &[String]) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now().naive_utc();
        info!(
            "Batch {} started: {} locations over {}, concurrency {}",
            run_id,
            location_ids.len(),
            range,
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, &location_id) in location_ids.iter().enumerate() {
            let coordinator = self.clone();
            let semaphore = semaphore.clone();
            let fields = fields.to_vec();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, coordinator.backfill_location(location_id, range, &fields).await)
            });
        }

        let mut slots: Vec<Option<BatchOutcome>> = vec![None; location_ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("Batch {} task failed to complete: {}", run_id, e),
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(location_ids)
            .map(|(slot, &location_id)| {
                slot.unwrap_or_else(|| BatchOutcome::failed(location_id, Some(range), "task aborted"))
            })
            .collect();

        let report = BatchReport::from_outcomes(run_id, started_at, outcomes);
        info!("Batch {} {}", run_id, report.message());
        report
    }

    /// Refresh the trailing window of one location, ending `provider_lag`
    /// days before today.
    pub async fn auto_refresh(&self, location_id: LocationId, fields: &[String]) -> BatchOutcome {
        self.auto_refresh_at(Local::now().date_naive(), location_id, fields).await
    }

    pub async fn auto_refresh_at(&self, today: NaiveDate, location_id: LocationId, fields: &[String]) -> BatchOutcome {
        match self.refresh_window(today) {
            Ok(range) => self.backfill_location(location_id, range, fields).await,
            Err(e) => BatchOutcome::failed(location_id, None, e.to_string()),
        }
    }

    /// Refresh every catalog location over the trailing window.
    pub async fn refresh_all(&self, fields: &[String]) -> BatchReport {
        self.refresh_all_at(Local::now().date_naive(), fields).await
    }

    pub async fn refresh_all_at(&self, today: NaiveDate, fields: &[String]) -> BatchReport {
        let ids: Vec<LocationId> = self.manager.locations.all().iter().map(|l| l.id).collect();
        match self.refresh_window(today) {
            Ok(range) => self.backfill(&ids, range, fields).await,
            Err(e) => {
                let outcomes = ids
                    .into_iter()
                    .map(|id| BatchOutcome::failed(id, None, e.to_string()))
                    .collect();
                BatchReport::from_outcomes(Uuid::new_v4(), Utc::now().naive_utc(), outcomes)
            }
        }
    }

    /// `[today - days_back - lag, today - lag]`
    pub fn refresh_window(&self, today: NaiveDate) -> WxResult<DateRange> {
        let back = |from: NaiveDate, days: i64| {
            Duration::try_days(days)
                .and_then(|span| from.checked_sub_signed(span))
                .ok_or_else(|| WxError::InvalidRange {
                    message: format!("{} days before {} is out of range", days, from),
                })
        };
        let end = back(today, self.provider_lag)?;
        let start = back(end, self.days_back)?;
        DateRange::new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{open_in_memory, LocationCatalog, ProviderQuery, WeatherProvider};
    use async_trait::async_trait;
    use wx_types::{AcquisitionError, FieldCatalog, HourlyDataset, Location};

    #[derive(Debug)]
    struct UnreachableProvider;

    #[async_trait]
    impl WeatherProvider for UnreachableProvider {
        async fn fetch_hourly(&self, _query: &ProviderQuery) -> Result<HourlyDataset, AcquisitionError> {
            Err(AcquisitionError::Connection {
                message: "archive unreachable".to_string(),
            })
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    fn coordinator(days_back: i64, lag: i64) -> BatchCoordinator {
        let locations = LocationCatalog::with_locations(vec![Location::new(
            1,
            "Nanning",
            108.3661,
            22.8172,
            "Asia/Shanghai",
        )]);
        let manager = DataManager::from_connection(
            open_in_memory().unwrap(),
            Duration::hours(1),
            Arc::new(locations),
            Arc::new(UnreachableProvider),
            Arc::new(FieldCatalog::default()),
        )
        .unwrap();
        BatchCoordinator::new(Arc::new(manager), 2).with_refresh_window(days_back, lag)
    }

    #[test]
    fn test_refresh_window_trails_provider_lag() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        let range = coordinator(7, 5).refresh_window(today).unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    }

    #[test]
    fn test_refresh_window_rejects_out_of_range_spans() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        assert!(matches!(
            coordinator(i64::MAX, 5).refresh_window(today),
            Err(WxError::InvalidRange { .. })
        ));
        assert!(coordinator(7, 1_000_000_000).refresh_window(today).is_err());
        assert!(coordinator(-3, 0).refresh_window(today).is_err());
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_location() {
        let coordinator = coordinator(7, 5);
        let range = DateRange::parse("2024-01-01", "2024-01-02").unwrap();
        let fields = vec!["temperature_2m".to_string()];

        let report = coordinator
            .backfill(&[LocationId(1), LocationId(404)], range, &fields)
            .await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.outcomes[0].location_name.as_deref(), Some("Nanning"));
        assert!(report.outcomes[0].message.contains("unreachable"));
        assert_eq!(report.outcomes[1].location_id, LocationId(404));
        assert!(!report.outcomes[1].success);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let coordinator = BatchCoordinator::new(coordinator(1, 0).manager, 0);
        assert_eq!(coordinator.concurrency, 1);
        let report = coordinator.backfill(&[], DateRange::parse("2024-01-01", "2024-01-01").unwrap(), &[]).await;
        assert_eq!(report.attempted, 0);
    }
}
