//! Edge Operator - an industrial operations assistant on a local model
//!
//! Answers operator questions with a local LLM (Ollama) and can switch to a
//! managed cloud model when one is reachable. The mode is explicit state:
//! a switch to cloud is only committed after a bounded probe succeeds, and a
//! failed cloud call never flips the mode back on its own.
//!
//! ## Key Features
//!
//! - **Model Router**: local/cloud mode with probe-before-switch
//! - **Session Store**: conversation turns persisted per session id
//! - **Operator Tools**: simulated sensors and actuators, a telemetry
//!   database, SCADA report extraction and document search
//! - **Metrics Tracking**: turns, tokens and switches per mode

pub mod agent;
pub mod api;
pub mod config;
pub mod metrics;
pub mod router;
pub mod session;
pub mod tools;
pub mod tui;

#[cfg(test)]
mod testing;

pub use agent::{EdgeOperator, StartupError, TurnError, TurnOutcome};
pub use api::{BackendEndpoint, ChatRequest, CloudBackend, InferenceBackend, OllamaBackend};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use metrics::MetricsTracker;
pub use router::{BackendCallError, ModeCell, ModeSwitchError, ModelMode, ModelRouter, ProbeFailure};
pub use session::{ConversationTurn, SessionStore};
pub use tools::{ToolCall, ToolError, ToolRegistry};
