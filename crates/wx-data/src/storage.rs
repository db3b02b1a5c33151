use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDateTime;
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use parking_lot::Mutex;
use wx_types::{FieldValues, HourlyRecord, LocationId, Observation, StoreError, StoreResult};

/// Layout of `observed_at`; fixed width so text ordering is time ordering.
const STORED_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const UPSERT_FIELD_SQL: &str = "INSERT INTO observations (location_id, observed_at, field, value)
     VALUES (?, ?, ?, ?)
     ON CONFLICT (location_id, observed_at, field) DO UPDATE SET value = excluded.value";

/// Open (or create) the on-disk database shared by the store and the cache.
pub fn open_database<P: AsRef<Path>>(path: P) -> StoreResult<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }
    }
    Connection::open(path).map_err(connection_error)
}

/// Open a throwaway in-memory database.
pub fn open_in_memory() -> StoreResult<Connection> {
    Connection::open_in_memory().map_err(connection_error)
}

pub(crate) fn connection_error(e: duckdb::Error) -> StoreError {
    StoreError::Connection { message: e.to_string() }
}

pub(crate) fn query_error(query: &str, e: duckdb::Error) -> StoreError {
    StoreError::QueryFailed {
        query: query.split_whitespace().collect::<Vec<_>>().join(" "),
        error: e.to_string(),
    }
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(STORED_TS_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> StoreResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, STORED_TS_FORMAT).map_err(|e| StoreError::Corruption {
        message: format!("bad observed_at '{}': {}", raw, e),
    })
}

/// Optional filter for [`ObservationStore::stats`]
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub location_id: Option<LocationId>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl StatsFilter {
    pub fn location(location_id: LocationId) -> Self {
        Self {
            location_id: Some(location_id),
            ..Default::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = self.location_id {
            conditions.push("location_id = ?");
            values.push(Value::BigInt(id.0));
        }
        if let Some(start) = self.start {
            conditions.push("observed_at >= ?");
            values.push(Value::Text(format_ts(start)));
        }
        if let Some(end) = self.end {
            conditions.push("observed_at <= ?");
            values.push(Value::Text(format_ts(end)));
        }
        let clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        (clause, values)
    }
}

/// Row count and time span of stored observations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub count: u64,
    pub min_timestamp: Option<NaiveDateTime>,
    pub max_timestamp: Option<NaiveDateTime>,
}

/// Durable table of hourly observations keyed by (location, timestamp).
///
/// Rows are kept in long form, one row per field, so an upsert only touches
/// the fields it supplies. A field with no row is unknown; a row holding
/// NULL is a supplied null.
#[derive(Debug)]
pub struct ObservationStore {
    connection: Mutex<Connection>,
}

impl ObservationStore {
    pub fn new(connection: Connection) -> StoreResult<Self> {
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS observations (
                    location_id BIGINT NOT NULL,
                    observed_at VARCHAR NOT NULL,
                    field VARCHAR NOT NULL,
                    value DOUBLE,
                    PRIMARY KEY (location_id, observed_at, field)
                );",
            )
            .map_err(connection_error)?;

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::new(open_database(path)?)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::new(open_in_memory()?)
    }

    /// Merge `fields` into the observation at (location, timestamp).
    pub fn upsert(&self, location_id: LocationId, timestamp: NaiveDateTime, fields: &FieldValues) -> StoreResult<()> {
        let record = HourlyRecord {
            datetime: timestamp,
            values: fields.clone(),
        };
        self.upsert_records(location_id, std::slice::from_ref(&record))?;
        Ok(())
    }

    /// Merge a batch of hourly records in one transaction.
    ///
    /// Returns the number of distinct hours written. Records without any
    /// field are skipped.
    pub fn upsert_records(&self, location_id: LocationId, records: &[HourlyRecord]) -> StoreResult<usize> {
        let mut conn = self.connection.lock();
        let tx = conn.transaction().map_err(connection_error)?;
        let mut written = BTreeSet::new();
        {
            let mut stmt = tx
                .prepare(UPSERT_FIELD_SQL)
                .map_err(|e| query_error(UPSERT_FIELD_SQL, e))?;

            for record in records {
                if record.values.is_empty() {
                    continue;
                }
                let observed_at = format_ts(record.datetime);
                for (field, value) in &record.values {
                    stmt.execute(params![location_id.0, observed_at, field, value])
                        .map_err(|e| query_error(UPSERT_FIELD_SQL, e))?;
                }
                written.insert(record.datetime);
            }
        }
        tx.commit().map_err(connection_error)?;

        tracing::debug!("Upserted {} observations for location {}", written.len(), location_id);
        Ok(written.len())
    }

    /// Observations in `[start, end]`, ascending by timestamp. Only stored
    /// hours are returned.
    pub fn query(&self, location_id: LocationId, start: NaiveDateTime, end: NaiveDateTime) -> StoreResult<Vec<Observation>> {
        const SQL: &str = "SELECT observed_at, field, value FROM observations
             WHERE location_id = ? AND observed_at >= ? AND observed_at <= ?
             ORDER BY observed_at, field";

        let conn = self.connection.lock();
        let mut stmt = conn.prepare(SQL).map_err(|e| query_error(SQL, e))?;
        let rows = stmt
            .query_map(params![location_id.0, format_ts(start), format_ts(end)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })
            .map_err(|e| query_error(SQL, e))?;

        let mut observations: Vec<Observation> = Vec::new();
        for row in rows {
            let (observed_at, field, value) = row.map_err(|e| query_error(SQL, e))?;
            let timestamp = parse_ts(&observed_at)?;
            match observations.last_mut() {
                Some(last) if last.timestamp == timestamp => {
                    last.fields.insert(field, value);
                }
                _ => {
                    let mut observation = Observation::new(location_id, timestamp);
                    observation.fields.insert(field, value);
                    observations.push(observation);
                }
            }
        }
        Ok(observations)
    }

    /// Delete observations of a location inside the given bounds.
    ///
    /// At least one bound is required; with neither bound nothing is deleted
    /// and 0 is returned. Use [`purge_location`](Self::purge_location) to
    /// drop a whole location.
    pub fn range_delete(
        &self,
        location_id: LocationId,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> StoreResult<usize> {
        if start.is_none() && end.is_none() {
            tracing::warn!("Refusing unbounded delete for location {}", location_id);
            return Ok(0);
        }
        self.delete_matching(StatsFilter {
            location_id: Some(location_id),
            start,
            end,
        })
    }

    /// Delete every observation of a location.
    pub fn purge_location(&self, location_id: LocationId) -> StoreResult<usize> {
        self.delete_matching(StatsFilter::location(location_id))
    }

    fn delete_matching(&self, filter: StatsFilter) -> StoreResult<usize> {
        let (clause, values) = filter.where_clause();
        let count_sql = format!(
            "SELECT COUNT(*) FROM (SELECT DISTINCT location_id, observed_at FROM observations WHERE {})",
            clause
        );
        let delete_sql = format!("DELETE FROM observations WHERE {}", clause);

        let mut conn = self.connection.lock();
        let tx = conn.transaction().map_err(connection_error)?;
        let deleted: i64 = tx
            .query_row(&count_sql, params_from_iter(values.clone()), |row| row.get(0))
            .map_err(|e| query_error(&count_sql, e))?;
        tx.execute(&delete_sql, params_from_iter(values))
            .map_err(|e| query_error(&delete_sql, e))?;
        tx.commit().map_err(connection_error)?;

        tracing::info!("Deleted {} observations ({})", deleted, clause);
        Ok(deleted as usize)
    }

    pub fn stats(&self, filter: &StatsFilter) -> StoreResult<StoreStats> {
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT COUNT(*), MIN(observed_at), MAX(observed_at)
             FROM (SELECT DISTINCT location_id, observed_at FROM observations WHERE {})",
            clause
        );

        let conn = self.connection.lock();
        let (count, min, max) = conn
            .query_row(&sql, params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| query_error(&sql, e))?;

        Ok(StoreStats {
            count: count as u64,
            min_timestamp: min.as_deref().map(parse_ts).transpose()?,
            max_timestamp: max.as_deref().map(parse_ts).transpose()?,
        })
    }

    /// Per-location counts and spans for every location with data.
    pub fn location_stats(&self) -> StoreResult<Vec<(LocationId, StoreStats)>> {
        const SQL: &str = "SELECT location_id, COUNT(*), MIN(observed_at), MAX(observed_at)
             FROM (SELECT DISTINCT location_id, observed_at FROM observations)
             GROUP BY location_id
             ORDER BY location_id";

        let conn = self.connection.lock();
        let mut stmt = conn.prepare(SQL).map_err(|e| query_error(SQL, e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|e| query_error(SQL, e))?;

        let mut stats = Vec::new();
        for row in rows {
            let (id, count, min, max) = row.map_err(|e| query_error(SQL, e))?;
            stats.push((
                LocationId(id),
                StoreStats {
                    count: count as u64,
                    min_timestamp: min.as_deref().map(parse_ts).transpose()?,
                    max_timestamp: max.as_deref().map(parse_ts).transpose()?,
                },
            ));
        }
        Ok(stats)
    }
}
