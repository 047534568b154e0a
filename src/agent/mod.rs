//! Edge operator facade
//!
//! Ties the router, the session store, the tools and the metrics together
//! into one conversational surface. A turn is: build a request from the
//! system prompt and recent history, route it, then persist the user and
//! assistant messages. Turns that fail or are cancelled leave no trace in
//! the session and never change the mode.

use crate::api::{
    ApiError, ChatRequest, CloudBackend, OllamaBackend, StreamChunk, TokenUsage,
};
use crate::config::{Config, ConfigError};
use crate::metrics::MetricsTracker;
use crate::router::{
    BackendCallError, BackendHealth, ModeCell, ModeSwitchError, ModelMode, ModelRouter,
};
use crate::session::{ConversationTurn, SessionError, SessionStats, SessionStore};
use crate::tools::{
    DeviceRegistry, DocumentIndex, TelemetryStore, TextSplitter, ToolCall, ToolError,
    ToolRegistry,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const SYSTEM_PROMPT: &str = "\
You are an Edge Operator Agent, an assistant for field operators who manage \
industrial equipment in manufacturing plants.

The operator can run these tools directly and may paste their output:
- IoT devices: list_devices, read_sensor, control_device
- Telemetry database: log_telemetry, query_telemetry, query_telemetry_aggregation
- SCADA reports: extract_scada_metrics
- Plant documents: search_documents

When responding:
- Be concise and clear
- Ask for confirmation before suggesting any actuator change
- Give context for sensor readings and suggest next steps when useful

You run on an edge device and work fully offline with a local model. A \
more capable cloud model may be selected when connectivity is available.";

/// A failed conversation turn
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error(transparent)]
    Backend(#[from] BackendCallError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Turn cancelled in {mode} mode")]
    Cancelled { mode: ModelMode, partial: String },
}

/// Failure while assembling the agent from configuration
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create backend client: {0}")]
    Backend(#[from] ApiError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// A completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub mode: ModelMode,
    pub content: String,
    pub usage: TokenUsage,
    pub truncated: bool,
}

/// Session store plus the history loaded from it
struct Conversation {
    store: SessionStore,
    history: Vec<ConversationTurn>,
}

impl Conversation {
    async fn record(
        &mut self,
        message: &str,
        answer: &str,
        mode: ModelMode,
    ) -> Result<(), SessionError> {
        let turns = [
            ConversationTurn::user(message),
            ConversationTurn::assistant(answer, mode),
        ];
        self.store.append(&turns).await?;
        self.history.extend(turns);
        Ok(())
    }
}

/// Router over the configured backends, starting in Local mode
pub fn router_from_config(config: &Config) -> Result<ModelRouter, StartupError> {
    let local = Arc::new(OllamaBackend::new(config.ollama_config())?);
    router_with_local(config, local)
}

fn router_with_local(
    config: &Config,
    local: Arc<OllamaBackend>,
) -> Result<ModelRouter, StartupError> {
    let cloud = Arc::new(CloudBackend::new(config.cloud_config())?);
    Ok(ModelRouter::new(
        local,
        cloud,
        ModeCell::new(),
        config.router_config(),
    ))
}

pub struct EdgeOperator {
    router: ModelRouter,
    conversation: Mutex<Conversation>,
    tools: ToolRegistry,
    metrics: MetricsTracker,
    max_history_turns: usize,
    system_prompt: String,
}

impl EdgeOperator {
    /// Assemble an agent and load the session's history
    pub async fn new(
        router: ModelRouter,
        store: SessionStore,
        tools: ToolRegistry,
        max_history_turns: usize,
    ) -> Result<Self, SessionError> {
        let history = store.load().await?;
        let mode = router.mode().await;
        info!(
            session = %store.id(),
            turns = history.len(),
            mode = %mode,
            "Edge operator ready"
        );

        Ok(Self {
            router,
            conversation: Mutex::new(Conversation { store, history }),
            tools,
            metrics: MetricsTracker::new(),
            max_history_turns,
            system_prompt: SYSTEM_PROMPT.to_string(),
        })
    }

    /// Build every component from configuration
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        config.validate()?;

        let local = Arc::new(OllamaBackend::new(config.ollama_config())?);
        let router = router_with_local(config, local.clone())?;

        let mut tools = ToolRegistry::new(DeviceRegistry::with_defaults())?;
        if config.telemetry.enabled {
            tools = tools.with_telemetry(TelemetryStore::open(&config.telemetry.db_path)?);
        }
        if config.documents.enabled {
            let splitter =
                TextSplitter::new(config.documents.chunk_size, config.documents.chunk_overlap)?;
            tools = tools.with_documents(DocumentIndex::new(local, splitter), config.documents.top_k);
        }

        let store =
            SessionStore::open(&config.session.storage_dir, &config.session.session_id).await?;
        Ok(Self::new(router, store, tools, config.session.max_history_turns).await?)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// Shared handle to the mode for display layers
    pub fn mode_handle(&self) -> ModeCell {
        self.router.mode_handle()
    }

    pub async fn current_mode(&self) -> ModelMode {
        self.router.mode().await
    }

    pub async fn session_id(&self) -> String {
        self.conversation.lock().await.store.id().to_string()
    }

    /// Turns loaded at start plus those recorded since
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.conversation.lock().await.history.clone()
    }

    pub async fn session_stats(&self) -> Result<SessionStats, SessionError> {
        self.conversation.lock().await.store.stats().await
    }

    pub async fn check_backends(&self) -> Vec<BackendHealth> {
        self.router.check_backends().await
    }

    /// Request a mode change; a refused switch leaves the mode as it was
    pub async fn set_model_mode(&self, target: ModelMode) -> Result<ModelMode, ModeSwitchError> {
        let result = self.router.switch_mode(target).await;
        self.metrics.record_switch(result.is_ok());
        result
    }

    /// Run a tool. Its errors reach the caller unchanged.
    pub async fn invoke_tool(&self, call: ToolCall) -> Result<String, ToolError> {
        let result = self.tools.invoke(call).await;
        self.metrics.record_tool_call(result.is_ok());
        result
    }

    fn build_request(&self, history: &[ConversationTurn], message: &str) -> ChatRequest {
        let skip = history.len().saturating_sub(self.max_history_turns);
        let context = history[skip..].iter().map(|t| t.to_message()).collect();

        ChatRequest::new(message)
            .with_system(self.system_prompt.clone())
            .with_history(context)
    }

    fn note_failure(&self, err: &BackendCallError) {
        if let BackendCallError::Failed { mode, .. } = err {
            self.metrics.record_failed_turn(*mode);
        }
    }

    /// One turn, waiting for the whole answer
    pub async fn chat(&self, message: &str) -> Result<TurnOutcome, TurnError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let mut conversation = self.conversation.lock().await;
        let request = self.build_request(&conversation.history, message);
        let started = Instant::now();

        let routed = self.router.complete(request).await.inspect_err(|e| {
            self.note_failure(e);
        })?;

        conversation
            .record(message, &routed.response.content, routed.mode)
            .await?;
        self.metrics
            .record_turn(routed.mode, routed.response.usage, started);

        Ok(TurnOutcome {
            mode: routed.mode,
            content: routed.response.content,
            usage: routed.response.usage,
            truncated: routed.response.truncated,
        })
    }

    /// One turn, handing each text delta to `on_delta` as it arrives.
    ///
    /// When `cancel` resolves first the in-flight call is dropped, nothing
    /// is persisted and the partial text comes back in the error.
    pub async fn stream_chat<F, C>(
        &self,
        message: &str,
        mut on_delta: F,
        cancel: C,
    ) -> Result<TurnOutcome, TurnError>
    where
        F: FnMut(&str) + Send,
        C: Future<Output = ()> + Send,
    {
        let message = message.trim();
        if message.is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let mut conversation = self.conversation.lock().await;
        let request = self.build_request(&conversation.history, message);
        let started = Instant::now();
        tokio::pin!(cancel);

        let routed = tokio::select! {
            biased;
            _ = &mut cancel => {
                let mode = self.router.mode().await;
                return Err(self.cancelled(mode, String::new()));
            }
            routed = self.router.stream(request) => routed.inspect_err(|e| self.note_failure(e))?,
        };

        let mode = routed.mode;
        let mut chunks = routed.chunks;
        let mut content = String::new();
        let mut usage = TokenUsage::default();
        let mut truncated = false;

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    return Err(self.cancelled(mode, content));
                }
                chunk = chunks.recv() => match chunk {
                    Some(StreamChunk::TextDelta(text)) => {
                        on_delta(&text);
                        content.push_str(&text);
                    }
                    Some(StreamChunk::Usage(partial)) => {
                        usage = usage.merge(partial);
                    }
                    Some(StreamChunk::Done(end)) => {
                        usage = usage.merge(end.usage);
                        truncated = end.truncated;
                        break;
                    }
                    Some(StreamChunk::Error(reason)) => {
                        let err = BackendCallError::Failed {
                            mode,
                            backend: routed.backend.clone(),
                            source: ApiError::Provider(reason),
                        };
                        warn!(mode = %mode, error = %err, "Stream failed mid-turn");
                        self.note_failure(&err);
                        return Err(err.into());
                    }
                    None => break,
                }
            }
        }

        conversation.record(message, &content, mode).await?;
        self.metrics.record_turn(mode, usage, started);
        debug!(mode = %mode, chars = content.len(), "Streamed turn complete");

        Ok(TurnOutcome {
            mode,
            content,
            usage,
            truncated,
        })
    }

    fn cancelled(&self, mode: ModelMode, partial: String) -> TurnError {
        info!(mode = %mode, "Turn cancelled");
        self.metrics.record_cancelled_turn();
        TurnError::Cancelled { mode, partial }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{ProbeFailure, RouterConfig};
    use crate::testing::{FakeBackend, ProbeBehavior};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        agent: EdgeOperator,
        local: Arc<FakeBackend>,
        cloud: Arc<FakeBackend>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(FakeBackend::local());
        let cloud = Arc::new(FakeBackend::cloud());
        let router = ModelRouter::new(
            local.clone(),
            cloud.clone(),
            ModeCell::new(),
            RouterConfig {
                probe_timeout: Duration::from_millis(200),
            },
        );
        let store = SessionStore::open(dir.path(), "test").await.unwrap();
        let tools = ToolRegistry::new(DeviceRegistry::with_defaults()).unwrap();
        let agent = EdgeOperator::new(router, store, tools, 4).await.unwrap();

        Harness {
            agent,
            local,
            cloud,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_chat_records_both_turns() {
        let h = harness().await;
        let outcome = h.agent.chat("read temp-sensor").await.unwrap();

        assert_eq!(outcome.mode, ModelMode::Local);
        assert_eq!(outcome.content, "fake-local: read temp-sensor");

        let history = h.agent.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].mode, Some(ModelMode::Local));
        assert_eq!(h.agent.metrics().summary().local_turns, 1);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let h = harness().await;
        assert!(matches!(h.agent.chat("   ").await, Err(TurnError::EmptyMessage)));
        assert_eq!(h.local.calls(), 0);
        assert!(h.agent.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_persisted_and_keeps_mode() {
        let h = harness().await;
        h.agent.set_model_mode(ModelMode::Cloud).await.unwrap();
        h.cloud.set_failing(true);

        let err = h.agent.chat("status").await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::Backend(BackendCallError::Failed { mode: ModelMode::Cloud, .. })
        ));
        assert_eq!(h.agent.current_mode().await, ModelMode::Cloud);
        assert!(h.agent.history().await.is_empty());
        assert_eq!(h.agent.metrics().summary().failed_turns, 1);
    }

    #[tokio::test]
    async fn test_refused_switch_is_counted() {
        let h = harness().await;
        h.cloud.set_probe(ProbeBehavior::Fail(ProbeFailure::Timeout));

        let err = h.agent.set_model_mode(ModelMode::Cloud).await.unwrap_err();
        assert_eq!(err.reason, ProbeFailure::Timeout);
        assert_eq!(h.agent.current_mode().await, ModelMode::Local);

        // The shell keeps serving in the unchanged mode
        let outcome = h.agent.chat("still there?").await.unwrap();
        assert_eq!(outcome.mode, ModelMode::Local);
        assert_eq!(h.agent.metrics().summary().switches_failed, 1);
    }

    #[tokio::test]
    async fn test_stream_chat_collects_deltas() {
        let h = harness().await;
        let mut seen = Vec::new();

        let outcome = h
            .agent
            .stream_chat("hello", |delta| seen.push(delta.to_string()), std::future::pending())
            .await
            .unwrap();

        assert_eq!(seen.concat(), "fake-local: hello");
        assert_eq!(outcome.content, "fake-local: hello");
        assert_eq!(outcome.usage.total_tokens, 15);
        assert_eq!(h.agent.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_aborts_only_the_call() {
        let h = harness().await;
        h.agent.set_model_mode(ModelMode::Cloud).await.unwrap();
        h.cloud.set_stream_stalls(true);

        let err = h
            .agent
            .stream_chat(
                "long report",
                |_| {},
                tokio::time::sleep(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        match err {
            TurnError::Cancelled { mode, partial } => {
                assert_eq!(mode, ModelMode::Cloud);
                assert!(!partial.is_empty());
            }
            other => panic!("Expected Cancelled, got {:?}", other),
        }
        assert_eq!(h.agent.current_mode().await, ModelMode::Cloud);
        assert!(h.agent.history().await.is_empty());

        h.cloud.set_stream_stalls(false);
        let outcome = h
            .agent
            .stream_chat("again", |_| {}, std::future::pending())
            .await
            .unwrap();
        assert_eq!(outcome.mode, ModelMode::Cloud);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_reloaded() {
        let h = harness().await;
        for i in 0..4 {
            h.agent.chat(&format!("msg {}", i)).await.unwrap();
        }

        let history = h.agent.history().await;
        let request = h.agent.build_request(&history, "next");
        // 4 history turns plus the pending message
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[0].content, "msg 2");

        let store = SessionStore::open(h._dir.path(), "test").await.unwrap();
        let router = ModelRouter::new(
            h.local.clone(),
            h.cloud.clone(),
            ModeCell::new(),
            RouterConfig::default(),
        );
        let tools = ToolRegistry::new(DeviceRegistry::with_defaults()).unwrap();
        let reopened = EdgeOperator::new(router, store, tools, 4).await.unwrap();
        assert_eq!(reopened.history().await.len(), 8);
        assert_eq!(reopened.current_mode().await, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_tool_errors_pass_through() {
        let h = harness().await;
        let err = h
            .agent
            .invoke_tool(ToolCall::ControlDevice {
                device_id: "conveyor".into(),
                action: "stop".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::UnknownDevice { .. }));
        assert_eq!(h.agent.metrics().summary().tool_errors, 1);
    }
}
