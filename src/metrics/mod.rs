//! Turn, token and mode-switch counters

use crate::api::TokenUsage;
use crate::router::ModelMode;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Counters for one backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModeMetrics {
    pub turns: u64,
    pub failed_turns: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(skip)]
    pub total_latency: Duration,
}

impl ModeMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn average_latency(&self) -> Option<Duration> {
        if self.turns == 0 {
            return None;
        }
        Some(self.total_latency / self.turns as u32)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub local: ModeMetrics,
    pub cloud: ModeMetrics,
    pub switches_ok: u64,
    pub switches_failed: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub cancelled_turns: u64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn mode_mut(&mut self, mode: ModelMode) -> &mut ModeMetrics {
        match mode {
            ModelMode::Local => &mut self.local,
            ModelMode::Cloud => &mut self.cloud,
        }
    }

    pub fn record_turn(&mut self, mode: ModelMode, usage: TokenUsage, latency: Duration) {
        let m = self.mode_mut(mode);
        m.turns += 1;
        m.prompt_tokens += usage.prompt_tokens as u64;
        m.completion_tokens += usage.completion_tokens as u64;
        m.total_latency += latency;
    }

    pub fn record_failed_turn(&mut self, mode: ModelMode) {
        self.mode_mut(mode).failed_turns += 1;
    }
}

/// Thread-safe metrics tracker
#[derive(Clone, Default)]
pub struct MetricsTracker {
    inner: Arc<Mutex<AgentMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut AgentMetrics)) {
        if let Ok(mut metrics) = self.inner.lock() {
            f(&mut metrics);
        }
    }

    pub fn record_turn(&self, mode: ModelMode, usage: TokenUsage, started: Instant) {
        let latency = started.elapsed();
        self.update(|m| m.record_turn(mode, usage, latency));
    }

    pub fn record_failed_turn(&self, mode: ModelMode) {
        self.update(|m| m.record_failed_turn(mode));
    }

    pub fn record_cancelled_turn(&self) {
        self.update(|m| m.cancelled_turns += 1);
    }

    pub fn record_switch(&self, succeeded: bool) {
        self.update(|m| {
            if succeeded {
                m.switches_ok += 1;
            } else {
                m.switches_failed += 1;
            }
        });
    }

    pub fn record_tool_call(&self, succeeded: bool) {
        self.update(|m| {
            m.tool_calls += 1;
            if !succeeded {
                m.tool_errors += 1;
            }
        });
    }

    pub fn get_metrics(&self) -> AgentMetrics {
        self.inner
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> MetricsSummary {
        let m = self.get_metrics();
        MetricsSummary {
            local_turns: m.local.turns,
            cloud_turns: m.cloud.turns,
            failed_turns: m.local.failed_turns + m.cloud.failed_turns,
            cancelled_turns: m.cancelled_turns,
            prompt_tokens: m.local.prompt_tokens + m.cloud.prompt_tokens,
            completion_tokens: m.local.completion_tokens + m.cloud.completion_tokens,
            local_avg_latency: m.local.average_latency(),
            cloud_avg_latency: m.cloud.average_latency(),
            switches_ok: m.switches_ok,
            switches_failed: m.switches_failed,
            tool_calls: m.tool_calls,
            tool_errors: m.tool_errors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub local_turns: u64,
    pub cloud_turns: u64,
    pub failed_turns: u64,
    pub cancelled_turns: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(skip)]
    pub local_avg_latency: Option<Duration>,
    #[serde(skip)]
    pub cloud_avg_latency: Option<Duration>,
    pub switches_ok: u64,
    pub switches_failed: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
}

impl MetricsSummary {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

fn latency(d: Option<Duration>) -> String {
    d.map(|d| format!("{:.2}s", d.as_secs_f64()))
        .unwrap_or_else(|| "-".to_string())
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Session Metrics ===")?;
        writeln!(
            f,
            "Turns: {} local (avg {}), {} cloud (avg {})",
            self.local_turns,
            latency(self.local_avg_latency),
            self.cloud_turns,
            latency(self.cloud_avg_latency)
        )?;
        writeln!(
            f,
            "Failed turns: {}, cancelled: {}",
            self.failed_turns, self.cancelled_turns
        )?;
        writeln!(
            f,
            "Tokens: {} ({} prompt, {} completion)",
            self.total_tokens(),
            self.prompt_tokens,
            self.completion_tokens
        )?;
        writeln!(
            f,
            "Mode switches: {} ok, {} refused",
            self.switches_ok, self.switches_failed
        )?;
        writeln!(f, "Tool calls: {} ({} failed)", self.tool_calls, self.tool_errors)?;
        Ok(())
    }
}
