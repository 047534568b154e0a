//! Operator tools: devices, telemetry, report extraction and document search
//!
//! Every tool is reachable through a typed [`ToolCall`]; the registry
//! dispatches it to the capability that owns it and renders the result as
//! text for the operator.

mod devices;
mod documents;
mod extraction;
mod telemetry;

pub use devices::{
    ActuatorDevice, ControlOutcome, Device, DeviceKind, DeviceRegistry, SensorDevice,
    SensorReading,
};
pub use documents::{cosine_similarity, DocumentChunk, DocumentIndex, SearchHit, TextSplitter};
pub use extraction::{
    Alarm, AlarmSeverity, EquipmentState, EquipmentStatus, ProductionMetrics, ScadaExtractor,
    SensorValue,
};
pub use telemetry::{
    format_records, AggregateResult, Aggregation, TelemetryFilter, TelemetryRecord,
    TelemetryStore, DEFAULT_QUERY_LIMIT,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Device '{device_id}' not found. Available devices: {}", .available.join(", "))]
    UnknownDevice {
        device_id: String,
        available: Vec<String>,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Telemetry database error: {0}")]
    Telemetry(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("{0} tools are not enabled")]
    Unavailable(Capability),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Groups of tools that are enabled together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Iot,
    Database,
    Retrieval,
    Extraction,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Iot => write!(f, "IoT"),
            Capability::Database => write!(f, "Database"),
            Capability::Retrieval => write!(f, "Retrieval"),
            Capability::Extraction => write!(f, "Extraction"),
        }
    }
}

/// A single tool invocation with typed arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    ListDevices {},
    ReadSensor {
        device_id: String,
    },
    ControlDevice {
        device_id: String,
        action: String,
    },
    LogTelemetry {
        device_id: String,
        metric_type: String,
        value: f64,
        unit: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    QueryTelemetry {
        #[serde(flatten)]
        filter: TelemetryFilter,
        #[serde(default)]
        limit: Option<usize>,
    },
    #[serde(rename = "query_telemetry_aggregation")]
    AggregateTelemetry {
        aggregation: String,
        #[serde(flatten)]
        filter: TelemetryFilter,
    },
    ExtractScadaMetrics {
        report_text: String,
    },
    IndexDocument {
        path: PathBuf,
    },
    SearchDocuments {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
}

impl ToolCall {
    /// Names accepted by [`ToolCall::from_json`]
    pub const NAMES: [&'static str; 9] = [
        "list_devices",
        "read_sensor",
        "control_device",
        "log_telemetry",
        "query_telemetry",
        "query_telemetry_aggregation",
        "extract_scada_metrics",
        "index_document",
        "search_documents",
    ];

    /// Build a call from a tool name and a JSON object of arguments
    pub fn from_json(name: &str, args: Value) -> Result<Self, ToolError> {
        if !Self::NAMES.contains(&name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        serde_json::from_value(serde_json::json!({ "tool": name, "args": args }))
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {}", name, e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ListDevices {} => "list_devices",
            ToolCall::ReadSensor { .. } => "read_sensor",
            ToolCall::ControlDevice { .. } => "control_device",
            ToolCall::LogTelemetry { .. } => "log_telemetry",
            ToolCall::QueryTelemetry { .. } => "query_telemetry",
            ToolCall::AggregateTelemetry { .. } => "query_telemetry_aggregation",
            ToolCall::ExtractScadaMetrics { .. } => "extract_scada_metrics",
            ToolCall::IndexDocument { .. } => "index_document",
            ToolCall::SearchDocuments { .. } => "search_documents",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            ToolCall::ListDevices {}
            | ToolCall::ReadSensor { .. }
            | ToolCall::ControlDevice { .. } => Capability::Iot,
            ToolCall::LogTelemetry { .. }
            | ToolCall::QueryTelemetry { .. }
            | ToolCall::AggregateTelemetry { .. } => Capability::Database,
            ToolCall::ExtractScadaMetrics { .. } => Capability::Extraction,
            ToolCall::IndexDocument { .. } | ToolCall::SearchDocuments { .. } => {
                Capability::Retrieval
            }
        }
    }
}

/// Owns the tool backends and dispatches calls to them
pub struct ToolRegistry {
    devices: Mutex<DeviceRegistry>,
    telemetry: Option<TelemetryStore>,
    extractor: ScadaExtractor,
    documents: Option<RwLock<DocumentIndex>>,
    default_top_k: usize,
}

impl ToolRegistry {
    pub fn new(devices: DeviceRegistry) -> Result<Self, ToolError> {
        Ok(Self {
            devices: Mutex::new(devices),
            telemetry: None,
            extractor: ScadaExtractor::new()?,
            documents: None,
            default_top_k: 4,
        })
    }

    pub fn with_telemetry(mut self, store: TelemetryStore) -> Self {
        self.telemetry = Some(store);
        self
    }

    pub fn with_documents(mut self, index: DocumentIndex, default_top_k: usize) -> Self {
        self.documents = Some(RwLock::new(index));
        self.default_top_k = default_top_k;
        self
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = vec![Capability::Iot, Capability::Extraction];
        if self.telemetry.is_some() {
            caps.push(Capability::Database);
        }
        if self.documents.is_some() {
            caps.push(Capability::Retrieval);
        }
        caps
    }

    fn telemetry(&self) -> Result<&TelemetryStore, ToolError> {
        self.telemetry
            .as_ref()
            .ok_or(ToolError::Unavailable(Capability::Database))
    }

    fn documents(&self) -> Result<&RwLock<DocumentIndex>, ToolError> {
        self.documents
            .as_ref()
            .ok_or(ToolError::Unavailable(Capability::Retrieval))
    }

    /// Run a call and render its result. Errors are returned as-is.
    pub async fn invoke(&self, call: ToolCall) -> Result<String, ToolError> {
        let name = call.name();
        info!(tool = name, capability = %call.capability(), "Invoking tool");

        let result = self.dispatch(call).await;
        if let Err(e) = &result {
            warn!(tool = name, error = %e, "Tool call failed");
        }
        result
    }

    async fn dispatch(&self, call: ToolCall) -> Result<String, ToolError> {
        match call {
            ToolCall::ListDevices {} => Ok(self.devices.lock().await.describe()),
            ToolCall::ReadSensor { device_id } => self
                .devices
                .lock()
                .await
                .read_sensor(&device_id)
                .map(|r| r.to_string()),
            ToolCall::ControlDevice { device_id, action } => self
                .devices
                .lock()
                .await
                .control_device(&device_id, &action)
                .map(|o| o.to_string()),
            ToolCall::LogTelemetry {
                device_id,
                metric_type,
                value,
                unit,
                timestamp,
            } => {
                let record = self
                    .telemetry()?
                    .log_telemetry(&device_id, &metric_type, value, &unit, timestamp.as_deref())
                    .await?;
                Ok(format!(
                    "Telemetry logged successfully:\n  Device ID: {}\n  Metric: {}\n  Value: {} {}\n  Timestamp: {}",
                    record.device_id, record.metric_type, record.value, record.unit, record.timestamp
                ))
            }
            ToolCall::QueryTelemetry { filter, limit } => {
                let records = self
                    .telemetry()?
                    .query_telemetry(&filter, limit.unwrap_or(DEFAULT_QUERY_LIMIT))
                    .await?;
                Ok(format_records(&records))
            }
            ToolCall::AggregateTelemetry { aggregation, filter } => {
                let aggregation: Aggregation = aggregation.parse()?;
                let result = self.telemetry()?.aggregate(aggregation, &filter).await?;
                Ok(result.to_string())
            }
            ToolCall::ExtractScadaMetrics { report_text } => self
                .extractor
                .extract(&report_text)
                .map(|m| m.to_string()),
            ToolCall::IndexDocument { path } => {
                let count = self.documents()?.write().await.add_file(&path).await?;
                Ok(format!("Indexed {} chunk(s) from {}", count, path.display()))
            }
            ToolCall::SearchDocuments { query, top_k } => {
                let index = self.documents()?.read().await;
                let hits = index
                    .search(&query, top_k.unwrap_or(self.default_top_k))
                    .await?;
                if hits.is_empty() {
                    return Ok("No matching document chunks.".to_string());
                }
                Ok(hits
                    .iter()
                    .map(|h| h.to_string())
                    .collect::<Vec<_>>()
                    .join("\n\n"))
            }
        }
    }
}
