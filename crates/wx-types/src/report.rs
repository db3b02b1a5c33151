use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::weather::{DateRange, LocationId};

/// A run of consecutive missing calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: i64,
}

impl MissingRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            days: (end - start).num_days() + 1,
        }
    }
}

/// Completeness of the stored history for one location and range.
///
/// Missing days are reported at day granularity, while `completeness_rate`
/// is scored in hours, so a partially stored day counts as existing but
/// still lowers the rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub location_id: LocationId,
    pub range: DateRange,
    pub total_days: i64,
    pub existing_days: usize,
    pub missing_days: usize,
    pub expected_hours: usize,
    pub existing_hours: usize,
    /// Percentage, rounded to two decimals.
    pub completeness_rate: f64,
    pub existing_dates: Vec<NaiveDate>,
    pub missing_dates: Vec<NaiveDate>,
    pub missing_ranges: Vec<MissingRange>,
}

impl GapReport {
    pub fn is_complete(&self) -> bool {
        self.missing_days == 0 && self.existing_hours >= self.expected_hours
    }
}

/// Result of one location inside a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub location_id: LocationId,
    #[serde(default)]
    pub location_name: Option<String>,
    pub range: Option<DateRange>,
    pub success: bool,
    pub fetched: usize,
    pub saved: usize,
    pub message: String,
}

impl BatchOutcome {
    pub fn succeeded(
        location_id: LocationId,
        location_name: Option<String>,
        range: DateRange,
        fetched: usize,
        saved: usize,
    ) -> Self {
        Self {
            location_id,
            location_name,
            range: Some(range),
            success: true,
            fetched,
            saved,
            message: format!("downloaded {} rows, saved {}", fetched, saved),
        }
    }

    pub fn failed(location_id: LocationId, range: Option<DateRange>, message: impl Into<String>) -> Self {
        Self {
            location_id,
            location_name: None,
            range,
            success: false,
            fetched: 0,
            saved: 0,
            message: message.into(),
        }
    }
}

/// Aggregate of a bulk backfill or refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: NaiveDateTime,
    pub outcomes: Vec<BatchOutcome>,
    pub attempted: usize,
    pub succeeded: usize,
    pub total_saved: usize,
}

impl BatchReport {
    pub fn from_outcomes(run_id: Uuid, started_at: NaiveDateTime, outcomes: Vec<BatchOutcome>) -> Self {
        let attempted = outcomes.len();
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let total_saved = outcomes.iter().filter(|o| o.success).map(|o| o.saved).sum();
        Self {
            run_id,
            started_at,
            outcomes,
            attempted,
            succeeded,
            total_saved,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn message(&self) -> String {
        format!(
            "completed {}/{} locations, saved {} rows",
            self.succeeded, self.attempted, self.total_saved
        )
    }
}
