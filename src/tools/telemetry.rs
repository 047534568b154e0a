//! SQLite telemetry log

use super::ToolError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS device_telemetry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        metric_type TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_device_id ON device_telemetry(device_id);
    CREATE INDEX IF NOT EXISTS idx_timestamp ON device_telemetry(timestamp);
";

pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// One stored measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub metric_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: String,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<16} {:<12} {} {}",
            self.timestamp, self.device_id, self.metric_type, self.value, self.unit
        )
    }
}

/// Optional narrowing of a telemetry query. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryFilter {
    pub device_id: Option<String>,
    pub metric_type: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl TelemetryFilter {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric_type: impl Into<String>) -> Self {
        self.metric_type = Some(metric_type.into());
        self
    }

    pub fn between(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// WHERE clause with positional placeholders and its bound values
    fn to_sql(&self) -> Result<(String, Vec<Value>), ToolError> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(device_id) = &self.device_id {
            conditions.push("device_id = ?");
            values.push(Value::Text(device_id.clone()));
        }
        if let Some(metric_type) = &self.metric_type {
            conditions.push("metric_type = ?");
            values.push(Value::Text(metric_type.clone()));
        }
        if let Some(start) = &self.start_time {
            conditions.push("timestamp >= ?");
            values.push(Value::Text(normalize_timestamp(start)?));
        }
        if let Some(end) = &self.end_time {
            conditions.push("timestamp <= ?");
            values.push(Value::Text(normalize_timestamp(end)?));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        Ok((clause, values))
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(d) = &self.device_id {
            parts.push(format!("device_id='{}'", d));
        }
        if let Some(m) = &self.metric_type {
            parts.push(format!("metric_type='{}'", m));
        }
        if let Some(s) = &self.start_time {
            parts.push(format!("from {}", s));
        }
        if let Some(e) = &self.end_time {
            parts.push(format!("to {}", e));
        }
        if parts.is_empty() {
            "all records".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Stored timestamps are UTC RFC 3339 with millisecond precision so that
/// text comparison orders them chronologically.
fn normalize_timestamp(raw: &str) -> Result<String, ToolError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| format_timestamp(t.with_timezone(&Utc)))
        .map_err(|e| ToolError::InvalidArguments(format!("Bad timestamp '{}': {}", raw, e)))
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Count,
    Sum,
}

impl Aggregation {
    pub const ALL: [Aggregation; 5] = [
        Aggregation::Avg,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::Count,
        Aggregation::Sum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
            Aggregation::Count => "COUNT",
            Aggregation::Sum => "SUM",
        }
    }

    fn select_expr(&self) -> &'static str {
        match self {
            Aggregation::Avg => "AVG(value)",
            Aggregation::Min => "MIN(value)",
            Aggregation::Max => "MAX(value)",
            Aggregation::Count => "COUNT(*)",
            Aggregation::Sum => "SUM(value)",
        }
    }
}

impl FromStr for Aggregation {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == upper)
            .ok_or_else(|| {
                ToolError::InvalidOperation(format!(
                    "Invalid aggregation '{}'. Valid options: AVG, MIN, MAX, COUNT, SUM",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub function: &'static str,
    pub filters: String,
    /// `None` when no rows matched a value aggregation
    pub value: Option<f64>,
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Aggregation Result:")?;
        writeln!(f, "  Function: {}", self.function)?;
        writeln!(f, "  Filters: {}", self.filters)?;
        match self.value {
            Some(v) => write!(f, "  Result: {}", v),
            None => write!(f, "  Result: no matching records"),
        }
    }
}

/// Telemetry table behind a single connection
#[derive(Clone)]
pub struct TelemetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl TelemetryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::Telemetry(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path).map_err(db_error)?;
        debug!(path = %path.display(), "Opened telemetry database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ToolError> {
        Self::init(Connection::open_in_memory().map_err(db_error)?)
    }

    fn init(conn: Connection) -> Result<Self, ToolError> {
        conn.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, ToolError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ToolError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ToolError::Telemetry("connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ToolError::Telemetry(e.to_string()))?
    }

    /// Store one measurement, stamped now unless a timestamp is given
    pub async fn log_telemetry(
        &self,
        device_id: &str,
        metric_type: &str,
        value: f64,
        unit: &str,
        timestamp: Option<&str>,
    ) -> Result<TelemetryRecord, ToolError> {
        if device_id.trim().is_empty() || metric_type.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "device_id and metric_type must not be empty".to_string(),
            ));
        }
        if !value.is_finite() {
            return Err(ToolError::InvalidArguments(format!(
                "value must be a finite number, got {}",
                value
            )));
        }

        let record = TelemetryRecord {
            device_id: device_id.to_string(),
            metric_type: metric_type.to_string(),
            value,
            unit: unit.to_string(),
            timestamp: match timestamp {
                Some(raw) => normalize_timestamp(raw)?,
                None => format_timestamp(Utc::now()),
            },
        };

        let row = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO device_telemetry (device_id, metric_type, value, unit, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.device_id, row.metric_type, row.value, row.unit, row.timestamp],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await?;

        debug!(device = %record.device_id, metric = %record.metric_type, "Logged telemetry");
        Ok(record)
    }

    /// Matching records, newest first
    pub async fn query_telemetry(
        &self,
        filter: &TelemetryFilter,
        limit: usize,
    ) -> Result<Vec<TelemetryRecord>, ToolError> {
        let (clause, mut values) = filter.to_sql()?;
        values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
        let sql = format!(
            "SELECT device_id, metric_type, value, unit, timestamp
             FROM device_telemetry {} ORDER BY timestamp DESC, id DESC LIMIT ?",
            clause
        );

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(db_error)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    Ok(TelemetryRecord {
                        device_id: row.get(0)?,
                        metric_type: row.get(1)?,
                        value: row.get(2)?,
                        unit: row.get(3)?,
                        timestamp: row.get(4)?,
                    })
                })
                .map_err(db_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
        })
        .await
    }

    pub async fn aggregate(
        &self,
        aggregation: Aggregation,
        filter: &TelemetryFilter,
    ) -> Result<AggregateResult, ToolError> {
        let (clause, values) = filter.to_sql()?;
        let sql = format!(
            "SELECT {} FROM device_telemetry {}",
            aggregation.select_expr(),
            clause
        );

        let value = self
            .with_conn(move |conn| {
                conn.query_row(&sql, params_from_iter(values), |row| row.get::<_, Option<f64>>(0))
                    .map_err(db_error)
            })
            .await?;

        Ok(AggregateResult {
            function: aggregation.as_str(),
            filters: filter.describe(),
            value,
        })
    }
}

fn db_error(e: rusqlite::Error) -> ToolError {
    ToolError::Telemetry(e.to_string())
}

/// Render query results the way the shell prints them
pub fn format_records(records: &[TelemetryRecord]) -> String {
    if records.is_empty() {
        return "No telemetry records found matching the criteria.".to_string();
    }
    let mut out = format!("Telemetry Query Results ({}):", records.len());
    for record in records {
        out.push_str("\n  ");
        out.push_str(&record.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> TelemetryStore {
        let store = TelemetryStore::open_in_memory().unwrap();
        for (i, value) in [20.0, 22.0, 24.0].into_iter().enumerate() {
            let ts = format!("2025-01-01T08:0{}:00Z", i);
            store
                .log_telemetry("temp-sensor", "temperature", value, "°C", Some(&ts))
                .await
                .unwrap();
        }
        store
            .log_telemetry("humidity-sensor", "humidity", 55.0, "%", Some("2025-01-01T08:05:00Z"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = seeded().await;

        let all = store
            .query_telemetry(&TelemetryFilter::default(), DEFAULT_QUERY_LIMIT)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].device_id, "humidity-sensor");

        let temps = store
            .query_telemetry(&TelemetryFilter::device("temp-sensor"), 2)
            .await
            .unwrap();
        assert_eq!(temps.len(), 2);
        assert_eq!(temps[0].value, 24.0);
    }

    #[tokio::test]
    async fn test_time_range_filter() {
        let store = seeded().await;
        let filter = TelemetryFilter::device("temp-sensor").between(
            Some("2025-01-01T08:01:00Z".into()),
            Some("2025-01-01T09:01:00+01:00".into()),
        );

        let rows = store.query_telemetry(&filter, 10).await.unwrap();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![24.0, 22.0]);
    }

    #[tokio::test]
    async fn test_aggregations() {
        let store = seeded().await;
        let filter = TelemetryFilter::device("temp-sensor").with_metric("temperature");

        let avg = store.aggregate(Aggregation::Avg, &filter).await.unwrap();
        assert_eq!(avg.value, Some(22.0));
        assert_eq!(avg.filters, "device_id='temp-sensor', metric_type='temperature'");

        let count = store
            .aggregate(Aggregation::Count, &TelemetryFilter::default())
            .await
            .unwrap();
        assert_eq!(count.value, Some(4.0));
        assert!(count.to_string().contains("all records"));

        let none = store
            .aggregate(Aggregation::Max, &TelemetryFilter::device("valve-actuator"))
            .await
            .unwrap();
        assert_eq!(none.value, None);
    }

    #[tokio::test]
    async fn test_values_are_bound_not_interpolated() {
        let store = seeded().await;
        let hostile = "x'; DROP TABLE device_telemetry; --";
        store
            .log_telemetry(hostile, "temperature", 1.0, "°C", None)
            .await
            .unwrap();

        let rows = store
            .query_telemetry(&TelemetryFilter::device(hostile), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, hostile);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let err = store
            .log_telemetry("temp-sensor", "temperature", 1.0, "°C", Some("yesterday"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = store
            .log_telemetry("temp-sensor", "temperature", f64::NAN, "°C", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        assert!("median".parse::<Aggregation>().is_err());
        assert_eq!("avg".parse::<Aggregation>().unwrap(), Aggregation::Avg);
    }

    #[test]
    fn test_format_records() {
        assert_eq!(
            format_records(&[]),
            "No telemetry records found matching the criteria."
        );
    }
}
