//! Local/cloud model routing
//!
//! This module decides which backend answers a turn:
//! - `route` reads the current mode and hands back the matching backend
//! - `switch_mode` moves to Local unconditionally, or to Cloud only after a
//!   bounded probe of the cloud backend succeeds
//! - backend failures during a turn are reported, never acted on; the mode
//!   changes only through an explicit switch

mod mode;

pub use mode::{ModeCell, ModelMode};

use crate::api::{ApiError, BackendEndpoint, ChatRequest, ChatResponse, InferenceBackend, StreamChunk};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a cloud probe failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    Timeout,
    AuthFailure,
    NetworkError,
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "probe timed out"),
            ProbeFailure::AuthFailure => write!(f, "credentials rejected"),
            ProbeFailure::NetworkError => write!(f, "backend unreachable"),
        }
    }
}

impl ProbeFailure {
    fn classify(err: &ApiError) -> Self {
        match err {
            ApiError::Timeout(_) => ProbeFailure::Timeout,
            ApiError::Auth(_) | ApiError::Quota(_) => ProbeFailure::AuthFailure,
            ApiError::Http(_) | ApiError::Provider(_) | ApiError::Serialization(_) => {
                ProbeFailure::NetworkError
            }
        }
    }
}

/// A mode switch that was refused. The mode is left as it was.
#[derive(Error, Debug, Clone)]
#[error("Cannot switch to {target} mode: {reason} ({detail})")]
pub struct ModeSwitchError {
    pub target: ModelMode,
    pub reason: ProbeFailure,
    pub detail: String,
}

/// A routed call that failed after the backend was selected
#[derive(Error, Debug)]
pub enum BackendCallError {
    #[error("Cannot route an empty message")]
    EmptyRequest,

    #[error("{backend} ({mode} mode) call failed: {source}")]
    Failed {
        mode: ModelMode,
        backend: String,
        #[source]
        source: ApiError,
    },
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Upper bound for the cloud reachability/credential probe
    pub probe_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Answer produced by a routed call, tagged with the mode that served it
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub mode: ModelMode,
    pub response: ChatResponse,
}

/// Streaming answer from a routed call
#[derive(Debug)]
pub struct RoutedStream {
    pub mode: ModelMode,
    pub backend: String,
    pub chunks: mpsc::Receiver<StreamChunk>,
}

/// Reachability of one backend, for status displays
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub mode: ModelMode,
    pub name: String,
    pub model: String,
    pub reachable: bool,
    pub detail: Option<String>,
    pub latency: Duration,
}

/// Chooses between the local and the cloud backend
pub struct ModelRouter {
    local: Arc<dyn InferenceBackend>,
    cloud: Arc<dyn InferenceBackend>,
    mode: ModeCell,
    config: RouterConfig,
}

impl ModelRouter {
    pub fn new(
        local: Arc<dyn InferenceBackend>,
        cloud: Arc<dyn InferenceBackend>,
        mode: ModeCell,
        config: RouterConfig,
    ) -> Self {
        Self {
            local,
            cloud,
            mode,
            config,
        }
    }

    /// Handle to the mode cell, for sharing with the presentation layer
    pub fn mode_handle(&self) -> ModeCell {
        self.mode.clone()
    }

    pub async fn mode(&self) -> ModelMode {
        self.mode.get().await
    }

    pub fn backend(&self, mode: ModelMode) -> &Arc<dyn InferenceBackend> {
        match mode {
            ModelMode::Local => &self.local,
            ModelMode::Cloud => &self.cloud,
        }
    }

    pub fn endpoint(&self, mode: ModelMode) -> &BackendEndpoint {
        self.backend(mode).endpoint()
    }

    /// The backend matching the current mode. Reads state only.
    pub async fn route(
        &self,
        request: &ChatRequest,
    ) -> Result<Arc<dyn InferenceBackend>, BackendCallError> {
        if !request.has_content() {
            return Err(BackendCallError::EmptyRequest);
        }

        let mode = self.mode.get().await;
        debug!(mode = %mode, "Routing request");
        Ok(Arc::clone(self.backend(mode)))
    }

    /// Switch modes. Local always succeeds; Cloud requires a successful probe.
    pub async fn switch_mode(&self, target: ModelMode) -> Result<ModelMode, ModeSwitchError> {
        match target {
            ModelMode::Local => {
                let previous = self.mode.set(ModelMode::Local).await;
                if previous != ModelMode::Local {
                    info!("Switched to local mode ({})", self.local.name());
                }
                Ok(ModelMode::Local)
            }
            ModelMode::Cloud => {
                // The lock is not held while probing; last writer wins
                self.probe_cloud().await?;
                let previous = self.mode.set(ModelMode::Cloud).await;
                if previous != ModelMode::Cloud {
                    info!("Switched to cloud mode ({})", self.cloud.name());
                }
                Ok(ModelMode::Cloud)
            }
        }
    }

    async fn probe_cloud(&self) -> Result<(), ModeSwitchError> {
        let outcome = tokio::time::timeout(self.config.probe_timeout, self.cloud.probe()).await;

        let err = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => ModeSwitchError {
                target: ModelMode::Cloud,
                reason: ProbeFailure::classify(&e),
                detail: e.to_string(),
            },
            Err(_) => ModeSwitchError {
                target: ModelMode::Cloud,
                reason: ProbeFailure::Timeout,
                detail: format!("no answer within {:?}", self.config.probe_timeout),
            },
        };

        warn!(reason = %err.reason, detail = %err.detail, "Cloud probe failed, mode unchanged");
        Err(err)
    }

    /// Route a request and wait for the full answer
    pub async fn complete(&self, request: ChatRequest) -> Result<RoutedResponse, BackendCallError> {
        let backend = self.route(&request).await?;
        let mode = backend.endpoint().kind;

        match backend.complete(request).await {
            Ok(response) => Ok(RoutedResponse { mode, response }),
            Err(source) => {
                warn!(mode = %mode, error = %source, "Backend call failed");
                Err(BackendCallError::Failed {
                    mode,
                    backend: backend.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Route a request and stream the answer
    pub async fn stream(&self, request: ChatRequest) -> Result<RoutedStream, BackendCallError> {
        let backend = self.route(&request).await?;
        let mode = backend.endpoint().kind;

        match backend.stream(request).await {
            Ok(chunks) => Ok(RoutedStream {
                mode,
                backend: backend.name().to_string(),
                chunks,
            }),
            Err(source) => {
                warn!(mode = %mode, error = %source, "Backend stream failed to start");
                Err(BackendCallError::Failed {
                    mode,
                    backend: backend.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Probe both backends without touching the mode
    pub async fn check_backends(&self) -> Vec<BackendHealth> {
        let (local, cloud) = tokio::join!(
            self.health(ModelMode::Local),
            self.health(ModelMode::Cloud)
        );
        vec![local, cloud]
    }

    async fn health(&self, mode: ModelMode) -> BackendHealth {
        let backend = self.backend(mode);
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, backend.probe()).await;

        let detail = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("no answer within {:?}", self.config.probe_timeout)),
        };

        BackendHealth {
            mode,
            name: backend.name().to_string(),
            model: backend.endpoint().model.clone(),
            reachable: detail.is_none(),
            detail,
            latency: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, ProbeBehavior};

    fn router(cloud_probe: ProbeBehavior) -> ModelRouter {
        ModelRouter::new(
            Arc::new(FakeBackend::local()),
            Arc::new(FakeBackend::cloud().with_probe(cloud_probe)),
            ModeCell::new(),
            RouterConfig {
                probe_timeout: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_starts_local() {
        let router = router(ProbeBehavior::Succeed);
        assert_eq!(router.mode().await, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_switch_to_local_is_idempotent() {
        let router = router(ProbeBehavior::Fail(ProbeFailure::NetworkError));
        assert_eq!(router.switch_mode(ModelMode::Local).await.unwrap(), ModelMode::Local);
        assert_eq!(router.switch_mode(ModelMode::Local).await.unwrap(), ModelMode::Local);
        assert_eq!(router.mode().await, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_cloud_when_already_cloud() {
        let cloud = Arc::new(FakeBackend::cloud());
        let router = ModelRouter::new(
            Arc::new(FakeBackend::local()),
            cloud.clone(),
            ModeCell::new(),
            RouterConfig::default(),
        );
        router.switch_mode(ModelMode::Cloud).await.unwrap();

        cloud.set_probe(ProbeBehavior::Fail(ProbeFailure::AuthFailure));
        let err = router.switch_mode(ModelMode::Cloud).await.unwrap_err();
        assert_eq!(err.reason, ProbeFailure::AuthFailure);
        assert_eq!(router.mode().await, ModelMode::Cloud);
    }

    #[tokio::test]
    async fn test_probe_timeout_fails_closed() {
        let router = router(ProbeBehavior::Hang);
        let err = router.switch_mode(ModelMode::Cloud).await.unwrap_err();
        assert_eq!(err.reason, ProbeFailure::Timeout);
        assert_eq!(router.mode().await, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let router = router(ProbeBehavior::Succeed);
        let result = router.route(&ChatRequest::new("  ")).await;
        assert!(matches!(result, Err(BackendCallError::EmptyRequest)));
    }

    #[tokio::test]
    async fn test_route_follows_mode() {
        let router = router(ProbeBehavior::Succeed);
        let request = ChatRequest::new("read temp-sensor");

        let backend = router.route(&request).await.unwrap();
        assert_eq!(backend.endpoint().kind, ModelMode::Local);

        router.switch_mode(ModelMode::Cloud).await.unwrap();
        let backend = router.route(&request).await.unwrap();
        assert_eq!(backend.endpoint().kind, ModelMode::Cloud);
        assert_eq!(backend.endpoint(), router.endpoint(ModelMode::Cloud));

        router.switch_mode(ModelMode::Local).await.unwrap();
        let backend = router.route(&request).await.unwrap();
        assert_eq!(backend.endpoint().kind, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_auth_failure_leaves_local() {
        let router = router(ProbeBehavior::Fail(ProbeFailure::AuthFailure));
        let err = router.switch_mode(ModelMode::Cloud).await.unwrap_err();

        assert_eq!(err.target, ModelMode::Cloud);
        assert_eq!(err.reason, ProbeFailure::AuthFailure);
        assert_eq!(router.mode().await, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_cloud_failure_mid_turn_keeps_cloud() {
        let cloud = Arc::new(FakeBackend::cloud());
        let router = ModelRouter::new(
            Arc::new(FakeBackend::local()),
            cloud.clone(),
            ModeCell::new(),
            RouterConfig::default(),
        );
        router.switch_mode(ModelMode::Cloud).await.unwrap();
        cloud.set_failing(true);

        let err = router
            .complete(ChatRequest::new("status of line 1"))
            .await
            .unwrap_err();

        match err {
            BackendCallError::Failed { mode, .. } => assert_eq!(mode, ModelMode::Cloud),
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert_eq!(router.mode().await, ModelMode::Cloud);
    }

    #[tokio::test]
    async fn test_complete_tags_serving_mode() {
        let router = router(ProbeBehavior::Succeed);
        let routed = router.complete(ChatRequest::new("hello")).await.unwrap();
        assert_eq!(routed.mode, ModelMode::Local);
        assert_eq!(routed.response.content, "fake-local: hello");
    }

    #[tokio::test]
    async fn test_concurrent_failed_switches_stay_local() {
        let router = Arc::new(router(ProbeBehavior::FailAfter(
            Duration::from_millis(20),
            ProbeFailure::AuthFailure,
        )));

        let attempts: Vec<_> = (0..4)
            .map(|_| {
                let router = Arc::clone(&router);
                tokio::spawn(async move { router.switch_mode(ModelMode::Cloud).await })
            })
            .collect();

        for attempt in attempts {
            let err = attempt.await.unwrap().unwrap_err();
            assert_eq!(err.reason, ProbeFailure::AuthFailure);
        }
        assert_eq!(router.mode().await, ModelMode::Local);
    }

    #[tokio::test]
    async fn test_slow_cloud_switch_lands_after_quick_local_switch() {
        let router = Arc::new(router(ProbeBehavior::SucceedAfter(Duration::from_millis(50))));

        let to_cloud = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.switch_mode(ModelMode::Cloud).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(router.switch_mode(ModelMode::Local).await.unwrap(), ModelMode::Local);
        assert!(!to_cloud.is_finished());
        assert_eq!(router.mode().await, ModelMode::Local);

        assert_eq!(to_cloud.await.unwrap().unwrap(), ModelMode::Cloud);
        assert_eq!(router.mode().await, ModelMode::Cloud);
    }

    #[tokio::test]
    async fn test_check_backends_does_not_switch() {
        let router = router(ProbeBehavior::Fail(ProbeFailure::NetworkError));
        let health = router.check_backends().await;

        assert_eq!(health.len(), 2);
        assert!(health[0].reachable);
        assert!(!health[1].reachable);
        assert_eq!(router.mode().await, ModelMode::Local);
    }

    proptest::proptest! {
        #[test]
        fn prop_mode_is_last_successful_target(
            steps in proptest::collection::vec((proptest::bool::ANY, proptest::bool::ANY), 0..16)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            runtime.block_on(async {
                let cloud = Arc::new(FakeBackend::cloud());
                let router = ModelRouter::new(
                    Arc::new(FakeBackend::local()),
                    cloud.clone(),
                    ModeCell::new(),
                    RouterConfig::default(),
                );
                let mut expected = ModelMode::Local;

                for (to_cloud, probe_ok) in steps {
                    if to_cloud {
                        cloud.set_probe(if probe_ok {
                            ProbeBehavior::Succeed
                        } else {
                            ProbeBehavior::Fail(ProbeFailure::NetworkError)
                        });
                        let result = router.switch_mode(ModelMode::Cloud).await;
                        assert_eq!(result.is_ok(), probe_ok);
                        if probe_ok {
                            expected = ModelMode::Cloud;
                        }
                    } else {
                        assert_eq!(router.switch_mode(ModelMode::Local).await.unwrap(), ModelMode::Local);
                        expected = ModelMode::Local;
                    }
                    assert_eq!(router.mode().await, expected);
                }
            });
        }
    }

    #[test]
    fn test_classify_probe_errors() {
        assert_eq!(
            ProbeFailure::classify(&ApiError::Timeout("slow".into())),
            ProbeFailure::Timeout
        );
        assert_eq!(
            ProbeFailure::classify(&ApiError::Quota("429".into())),
            ProbeFailure::AuthFailure
        );
        assert_eq!(
            ProbeFailure::classify(&ApiError::Provider("502".into())),
            ProbeFailure::NetworkError
        );
    }
}
