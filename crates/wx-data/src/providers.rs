use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use wx_types::{hour_format, AcquisitionError, FieldCatalog, HourlyDataset, HourlyRecord};

/// Parameters of one remote time-series call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Field names (not wire names).
    pub fields: Vec<String>,
    pub timezone: String,
}

/// Remote source of hourly history
#[async_trait]
pub trait WeatherProvider: Send + Sync + std::fmt::Debug {
    /// Fetch the full range for the given fields in a single call.
    async fn fetch_hourly(&self, query: &ProviderQuery) -> Result<HourlyDataset, AcquisitionError>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Client for the Open-Meteo historical archive
#[derive(Debug)]
pub struct OpenMeteoProvider {
    pub name: String,
    pub base_url: String,
    catalog: Arc<FieldCatalog>,
    client: reqwest::Client,
}

impl OpenMeteoProvider {
    pub fn new(base_url: &str, timeout: Duration, catalog: Arc<FieldCatalog>) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Request {
                message: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Self {
            name: "Open-Meteo Archive".to_string(),
            base_url: base_url.to_string(),
            catalog,
            client,
        })
    }

    fn query_params(&self, query: &ProviderQuery) -> Vec<(&'static str, String)> {
        let hourly = query
            .fields
            .iter()
            .map(|f| self.catalog.wire_name(f))
            .collect::<Vec<_>>()
            .join(",");

        vec![
            ("latitude", query.latitude.to_string()),
            ("longitude", query.longitude.to_string()),
            ("start_date", query.start.format("%Y-%m-%d").to_string()),
            ("end_date", query.end.format("%Y-%m-%d").to_string()),
            ("hourly", hourly),
            ("timezone", query.timezone.clone()),
        ]
    }
}

fn classify(e: reqwest::Error) -> AcquisitionError {
    if e.is_timeout() {
        AcquisitionError::Timeout { message: e.to_string() }
    } else if e.is_connect() {
        AcquisitionError::Connection { message: e.to_string() }
    } else if let Some(status) = e.status() {
        AcquisitionError::HttpStatus {
            status: status.as_u16(),
            message: e.to_string(),
        }
    } else if e.is_decode() {
        AcquisitionError::InvalidResponse { message: e.to_string() }
    } else {
        AcquisitionError::Request { message: e.to_string() }
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn fetch_hourly(&self, query: &ProviderQuery) -> Result<HourlyDataset, AcquisitionError> {
        tracing::info!(
            "Calling {} for ({}, {}) {} to {}, {} fields",
            self.name,
            query.latitude,
            query.longitude,
            query.start,
            query.end,
            query.fields.len()
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&self.query_params(query))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            // The archive explains rejections as {"error": true, "reason": "..."}
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(AcquisitionError::HttpStatus {
                status: status.as_u16(),
                message: reason,
            });
        }

        let json: Value = response.json().await.map_err(classify)?;
        let dataset = parse_hourly_response(&json, &query.fields, &self.catalog)?;

        tracing::info!("Retrieved {} hourly rows from {}", dataset.records.len(), self.name);
        Ok(dataset)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Turn the provider's columnar `hourly` object into per-hour records.
///
/// A field whose column is missing entirely is left out of the records
/// (unknown); a column shorter than `time` or holding null yields an
/// explicit null for that hour.
pub fn parse_hourly_response(
    response: &Value,
    fields: &[String],
    catalog: &FieldCatalog,
) -> Result<HourlyDataset, AcquisitionError> {
    let invalid = |message: String| AcquisitionError::InvalidResponse { message };

    let hourly = response
        .get("hourly")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing 'hourly' object".to_string()))?;
    let times = hourly
        .get("time")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing 'hourly.time' array".to_string()))?;

    let columns: Vec<(&String, &Vec<Value>)> = fields
        .iter()
        .filter_map(|field| {
            let wire = catalog.wire_name(field);
            hourly.get(wire).and_then(Value::as_array).map(|col| (field, col))
        })
        .collect();

    let mut records = Vec::with_capacity(times.len());
    for (i, time) in times.iter().enumerate() {
        let raw = time
            .as_str()
            .ok_or_else(|| invalid(format!("time[{}] is not a string", i)))?;
        let datetime = hour_format::parse(raw).map_err(|e| invalid(format!("bad timestamp '{}': {}", raw, e)))?;

        let mut record = HourlyRecord::new(datetime);
        for (field, column) in &columns {
            let value = column.get(i).and_then(Value::as_f64);
            record.values.insert((*field).clone(), value);
        }
        records.push(record);
    }

    Ok(HourlyDataset {
        latitude: response.get("latitude").and_then(Value::as_f64).unwrap_or_default(),
        longitude: response.get("longitude").and_then(Value::as_f64).unwrap_or_default(),
        elevation: response.get("elevation").and_then(Value::as_f64),
        timezone: response
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_translates_wire_names() {
        let response = json!({
            "latitude": 22.8,
            "longitude": 108.4,
            "elevation": 79.0,
            "timezone": "Asia/Shanghai",
            "hourly": {
                "time": ["2024-01-01T00:00", "2024-01-01T01:00"],
                "temperature_2m": [12.1, 11.8],
                "et0_fao_evapotranspiration": [0.0, null]
            }
        });
        let catalog = FieldCatalog::default();
        let dataset = parse_hourly_response(
            &response,
            &fields(&["temperature_2m", "evapotranspiration"]),
            &catalog,
        )
        .unwrap();

        assert_eq!(dataset.records.len(), 2);
        assert_eq!(dataset.timezone, "Asia/Shanghai");
        assert_eq!(dataset.elevation, Some(79.0));
        assert_eq!(dataset.records[0].values["evapotranspiration"], Some(0.0));
        assert_eq!(dataset.records[1].values["evapotranspiration"], None);
        assert_eq!(dataset.records[1].values["temperature_2m"], Some(11.8));
    }

    #[test]
    fn test_parse_missing_column_and_short_column() {
        let response = json!({
            "hourly": {
                "time": ["2024-01-01T00:00", "2024-01-01T01:00"],
                "rain": [0.4]
            }
        });
        let dataset = parse_hourly_response(
            &response,
            &fields(&["rain", "snowfall"]),
            &FieldCatalog::default(),
        )
        .unwrap();

        assert!(!dataset.records[0].values.contains_key("snowfall"));
        assert_eq!(dataset.records[0].values["rain"], Some(0.4));
        assert_eq!(dataset.records[1].values.get("rain"), Some(&None));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let catalog = FieldCatalog::default();
        let no_hourly = json!({"latitude": 1.0});
        assert!(matches!(
            parse_hourly_response(&no_hourly, &fields(&["rain"]), &catalog),
            Err(AcquisitionError::InvalidResponse { .. })
        ));

        let bad_time = json!({"hourly": {"time": ["yesterday"], "rain": [1.0]}});
        assert!(matches!(
            parse_hourly_response(&bad_time, &fields(&["rain"]), &catalog),
            Err(AcquisitionError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_query_params_use_wire_names() {
        let provider = OpenMeteoProvider::new(
            "https://archive.example/v1/archive",
            Duration::from_secs(5),
            Arc::new(FieldCatalog::default()),
        )
        .unwrap();
        let query = ProviderQuery {
            latitude: 22.8172,
            longitude: 108.3661,
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            fields: fields(&["temperature_2m", "evapotranspiration"]),
            timezone: "Asia/Shanghai".to_string(),
        };

        let params = provider.query_params(&query);
        let hourly = params.iter().find(|(k, _)| *k == "hourly").map(|(_, v)| v.as_str());
        assert_eq!(hourly, Some("temperature_2m,et0_fao_evapotranspiration"));
        assert!(params.contains(&("start_date", "2024-01-01".to_string())));
    }
}
