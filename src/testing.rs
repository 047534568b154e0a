//! In-process fakes shared by unit tests

use crate::api::{
    ApiError, BackendEndpoint, ChatRequest, ChatResponse, Embedder, InferenceBackend,
    StreamChunk, StreamEnd, TokenUsage,
};
use crate::router::ProbeFailure;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBehavior {
    Succeed,
    Fail(ProbeFailure),
    /// Answer after a delay, so concurrent switches overlap
    SucceedAfter(Duration),
    FailAfter(Duration, ProbeFailure),
    Hang,
}

/// Backend answering "<name>: <pending message>" without any I/O
pub struct FakeBackend {
    endpoint: BackendEndpoint,
    name: &'static str,
    probe: Mutex<ProbeBehavior>,
    failing: AtomicBool,
    stream_stalls: AtomicBool,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn local() -> Self {
        Self::new(BackendEndpoint::local("http://127.0.0.1:11434", "local-model"), "fake-local")
    }

    pub fn cloud() -> Self {
        Self::new(
            BackendEndpoint::cloud("https://cloud.invalid/v1", None, "cloud-model"),
            "fake-cloud",
        )
    }

    fn new(endpoint: BackendEndpoint, name: &'static str) -> Self {
        Self {
            endpoint,
            name,
            probe: Mutex::new(ProbeBehavior::Succeed),
            failing: AtomicBool::new(false),
            stream_stalls: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_probe(self, behavior: ProbeBehavior) -> Self {
        self.set_probe(behavior);
        self
    }

    pub fn set_probe(&self, behavior: ProbeBehavior) {
        *self.probe.lock().unwrap() = behavior;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Streams send one delta and then never finish
    pub fn set_stream_stalls(&self, stalls: bool) {
        self.stream_stalls.store(stalls, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, request: &ChatRequest) -> String {
        format!("{}: {}", self.name, request.pending_content().unwrap_or_default())
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Provider(format!("{} unavailable", self.name)));
        }

        Ok(ChatResponse {
            content: self.answer(&request),
            usage: TokenUsage::new(10, 5),
            model: self.endpoint.model.clone(),
            truncated: false,
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<StreamChunk>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Provider(format!("{} unavailable", self.name)));
        }

        let (tx, rx) = mpsc::channel(8);
        let answer = self.answer(&request);
        let stalls = self.stream_stalls.load(Ordering::SeqCst);

        tokio::spawn(async move {
            let mid = answer
                .char_indices()
                .nth(answer.chars().count() / 2)
                .map(|(i, _)| i)
                .unwrap_or(answer.len());
            let (head, tail) = answer.split_at(mid);
            let _ = tx.send(StreamChunk::TextDelta(head.to_string())).await;
            if stalls {
                tx.closed().await;
                return;
            }
            let _ = tx.send(StreamChunk::TextDelta(tail.to_string())).await;
            let _ = tx
                .send(StreamChunk::Done(StreamEnd::new(TokenUsage::new(10, 5), false)))
                .await;
        });

        Ok(rx)
    }

    async fn probe(&self) -> Result<(), ApiError> {
        let behavior = *self.probe.lock().unwrap();
        match behavior {
            ProbeBehavior::Succeed => Ok(()),
            ProbeBehavior::Fail(failure) => Err(probe_error(failure)),
            ProbeBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ProbeBehavior::FailAfter(delay, failure) => {
                tokio::time::sleep(delay).await;
                Err(probe_error(failure))
            }
            ProbeBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

fn probe_error(failure: ProbeFailure) -> ApiError {
    match failure {
        ProbeFailure::Timeout => ApiError::Timeout("probe".into()),
        ProbeFailure::AuthFailure => ApiError::Auth("401 Unauthorized".into()),
        ProbeFailure::NetworkError => ApiError::Provider("connection refused".into()),
    }
}

/// Embeds text as letter-frequency vectors over a..z
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 26];
                for c in text.to_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}
