//! Execution adapter boundary
//!
//! The routing core never speaks a provider's wire protocol. It calls an
//! [`ExecutionAdapter`] and reads back a success flag, token counts and,
//! on failure, an [`ErrorKind`]. Real HTTP adapters and the
//! [`SimulatedAdapter`] are interchangeable.

use crate::error::ErrorKind;
use crate::task::estimate_tokens;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// What an adapter reports for one backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub success: bool,
    pub text: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub error_kind: Option<ErrorKind>,
}

impl InvocationResponse {
    pub fn ok(text: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            success: true,
            text: Some(text.into()),
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            success: false,
            text: None,
            prompt_tokens: None,
            completion_tokens: None,
            error_kind: Some(kind),
        }
    }

    /// Failure kind, treating a failure without one as `Unknown`.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        if self.success {
            None
        } else {
            Some(self.error_kind.unwrap_or(ErrorKind::Unknown))
        }
    }
}

/// Invokes a backend. Implementations own transport, auth and transport-level retries.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn invoke(&self, backend_id: &str, prompt: &str, timeout: Duration)
        -> InvocationResponse;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Succeed,
    Fail(ErrorKind),
}

#[derive(Debug, Clone)]
struct SimulatedBackend {
    latency: Duration,
    script: VecDeque<Step>,
    fallback: Step,
}

impl SimulatedBackend {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            script: VecDeque::new(),
            fallback: Step::Succeed,
        }
    }
}

/// Scripted in-process adapter.
///
/// Each backend has a fixed latency, an optional queue of one-shot outcomes,
/// and a default outcome once the queue is drained. Unknown backends fail
/// with `ModelNotFound`.
#[derive(Debug, Default)]
pub struct SimulatedAdapter {
    backends: Mutex<HashMap<String, SimulatedBackend>>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(self, backend_id: &str, latency: Duration) -> Self {
        self.backends_mut()
            .insert(backend_id.to_string(), SimulatedBackend::new(latency));
        self
    }

    /// Queue a one-shot failure for the backend's next call.
    pub fn fail_next(self, backend_id: &str, kind: ErrorKind) -> Self {
        self.script(backend_id, Step::Fail(kind));
        self
    }

    /// Queue a one-shot success for the backend's next call.
    pub fn succeed_next(self, backend_id: &str) -> Self {
        self.script(backend_id, Step::Succeed);
        self
    }

    /// Fail every call once the script is drained.
    pub fn always_fail(self, backend_id: &str, kind: ErrorKind) -> Self {
        if let Some(backend) = self.backends_mut().get_mut(backend_id) {
            backend.fallback = Step::Fail(kind);
        }
        self
    }

    /// Backend ids in the order they were invoked.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn script(&self, backend_id: &str, step: Step) {
        if let Some(backend) = self.backends_mut().get_mut(backend_id) {
            backend.script.push_back(step);
        }
    }

    fn backends_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, SimulatedBackend>> {
        self.backends.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_step(&self, backend_id: &str) -> Option<(Duration, Step)> {
        let mut backends = self.backends_mut();
        let backend = backends.get_mut(backend_id)?;
        let step = backend.script.pop_front().unwrap_or(backend.fallback);
        Some((backend.latency, step))
    }
}

#[async_trait]
impl ExecutionAdapter for SimulatedAdapter {
    async fn invoke(
        &self,
        backend_id: &str,
        prompt: &str,
        _timeout: Duration,
    ) -> InvocationResponse {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(backend_id.to_string());

        let Some((latency, step)) = self.next_step(backend_id) else {
            return InvocationResponse::failed(ErrorKind::ModelNotFound);
        };

        tokio::time::sleep(latency).await;

        match step {
            Step::Succeed => {
                let prompt_tokens = estimate_tokens(prompt);
                InvocationResponse::ok(
                    format!("[{}] simulated completion", backend_id),
                    prompt_tokens,
                    prompt_tokens / 2 + 1,
                )
            }
            Step::Fail(kind) => InvocationResponse::failed(kind),
        }
    }
}
