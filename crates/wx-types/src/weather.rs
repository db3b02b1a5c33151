use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{WxError, WxResult};

/// Timestamp layout used by the archive provider and by stored observations
pub const HOUR_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Sparse field payload of one hourly record.
///
/// A key that is missing means "not known". A key mapped to `None` means the
/// value was supplied and is null.
pub type FieldValues = BTreeMap<String, Option<f64>>;

/// Identifier of a location in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named geographic point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub timezone: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl Location {
    pub fn new(id: i64, name: &str, longitude: f64, latitude: f64, timezone: &str) -> Self {
        Self {
            id: LocationId(id),
            name: name.to_string(),
            longitude,
            latitude,
            timezone: timezone.to_string(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = WxError;

    fn try_from(raw: RawDateRange) -> WxResult<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> WxResult<Self> {
        if end < start {
            return Err(WxError::InvalidRange {
                message: format!("end date {} is before start date {}", end, start),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse a pair of `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> WxResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| WxError::InvalidRange {
                message: format!("invalid date '{}': {}", s, e),
            })
        };
        Self::new(parse(start)?, parse(end)?)
    }

    /// Re-check ordering for ranges built field by field.
    pub fn validate(&self) -> WxResult<()> {
        Self::new(self.start, self.end).map(|_| ())
    }

    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn expected_hours(&self) -> usize {
        self.day_count().max(0) as usize * 24
    }

    /// First hour of the first day.
    pub fn first_hour(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// Last hour of the last day.
    pub fn last_hour(&self) -> NaiveDateTime {
        self.end.and_time(NaiveTime::MIN) + Duration::hours(23)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// One stored hourly observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location_id: LocationId,
    pub timestamp: NaiveDateTime,
    pub fields: FieldValues,
}

impl Observation {
    pub fn new(location_id: LocationId, timestamp: NaiveDateTime) -> Self {
        Self {
            location_id,
            timestamp,
            fields: FieldValues::new(),
        }
    }

    /// True when the field was stored with a non-null value.
    pub fn has_value(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(Some(_)))
    }

    pub fn to_record(&self) -> HourlyRecord {
        HourlyRecord {
            datetime: self.timestamp,
            values: self.fields.clone(),
        }
    }
}

/// One hourly row as exchanged with callers, the provider and the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    #[serde(with = "hour_format")]
    pub datetime: NaiveDateTime,
    #[serde(flatten)]
    pub values: FieldValues,
}

impl HourlyRecord {
    pub fn new(datetime: NaiveDateTime) -> Self {
        Self {
            datetime,
            values: FieldValues::new(),
        }
    }

    pub fn with_value(mut self, field: &str, value: Option<f64>) -> Self {
        self.values.insert(field.to_string(), value);
        self
    }

    /// Keep exactly the requested fields; requested fields that are not
    /// known for this hour come back as null.
    pub fn project(&self, fields: &[String]) -> HourlyRecord {
        let values = fields
            .iter()
            .map(|field| (field.clone(), self.values.get(field).copied().flatten()))
            .collect();
        HourlyRecord {
            datetime: self.datetime,
            values,
        }
    }
}

/// Parsed provider result for one coordinate and date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyDataset {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    pub timezone: String,
    pub records: Vec<HourlyRecord>,
}

/// A request for hourly history at a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRequest {
    /// When present the request runs in persistent mode.
    pub location_id: Option<LocationId>,
    pub longitude: f64,
    pub latitude: f64,
    pub timezone: String,
    pub range: DateRange,
    pub fields: Vec<String>,
}

impl HistoricalRequest {
    pub fn for_location(location: &Location, range: DateRange, fields: Vec<String>) -> Self {
        Self {
            location_id: Some(location.id),
            longitude: location.longitude,
            latitude: location.latitude,
            timezone: location.timezone.clone(),
            range,
            fields,
        }
    }

    pub fn at_point(
        longitude: f64,
        latitude: f64,
        timezone: &str,
        range: DateRange,
        fields: Vec<String>,
    ) -> Self {
        Self {
            location_id: None,
            longitude,
            latitude,
            timezone: timezone.to_string(),
            range,
            fields,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.location_id.is_some()
    }

    pub fn validate(&self) -> WxResult<()> {
        self.range.validate()?;
        if self.fields.is_empty() {
            return Err(WxError::InvalidRange {
                message: "at least one field must be requested".to_string(),
            });
        }
        if self.fields.iter().any(|f| f.trim().is_empty()) {
            return Err(WxError::InvalidRange {
                message: "field names must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Where the rows of a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    Store,
    Cache,
    Remote,
}

/// Fetch succeeded but the rows could not be saved locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceWarning {
    pub location_id: LocationId,
    pub message: String,
}

impl fmt::Display for PersistenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows for location {} were not saved: {}", self.location_id, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub origin: DataOrigin,
    pub records: Vec<HourlyRecord>,
    /// Rows obtained from the provider or the cache before filtering.
    pub fetched: usize,
    /// Observations written to the store by this request.
    pub persisted: usize,
    #[serde(default)]
    pub warnings: Vec<PersistenceWarning>,
}

pub mod hour_format {
    use super::HOUR_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(HOUR_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Accepts both minute and second resolution.
    pub fn parse(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw, HOUR_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
    }
}
