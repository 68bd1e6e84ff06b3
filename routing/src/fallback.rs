//! Fallback Coordinator: walks the ranked candidates until one succeeds
//!
//! # State machine
//!
//! ```text
//! Pending ──► Attempting(b) ──success──► Succeeded
//!                  │
//!               failure
//!                  ▼
//!              Cascading ──candidate left & budget left──► Attempting(next)
//!                  │
//!                  └──────────otherwise──────────► ExhaustedFailed
//! ```
//!
//! # Cascade policy by error kind
//!
//! | Kind | Remaining candidates |
//! |------|----------------------|
//! | RateLimited, ServerError, Timeout, ModelNotFound | unchanged, move on immediately |
//! | ContextLengthExceeded | only larger context windows than the failed backend |
//! | AuthenticationError, InvalidRequest | one cascade per task; fail at once if only the same auth domain is left |
//! | Unknown | unchanged |
//!
//! Every kind is bounded by `max_fallback_attempts` across the whole task.

use crate::adapter::{ExecutionAdapter, InvocationResponse};
use crate::config::FallbackPolicy;
use crate::cost::{CostEstimate, CostLedger};
use crate::decision::{CandidateScore, DecisionEngine, RankConstraints};
use crate::error::{CascadeClass, ErrorKind};
use crate::profile::{ComplexityBucket, Observation};
use crate::task::{Task, TaskId, TaskState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// States of one task's walk through its candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FallbackState {
    Pending,
    Attempting { backend_id: String },
    Cascading { from: String, error_kind: ErrorKind },
    Succeeded { backend_id: String },
    ExhaustedFailed,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::ExhaustedFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed(ErrorKind),
}

/// One attempt in a task's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub backend_id: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub timeout_ms: u64,
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Nothing to try; never subject to fallback
    NoEligibleBackend,
    /// Kind of the last failed attempt
    Backend(ErrorKind),
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEligibleBackend => write!(f, "no_eligible_backend"),
            Self::Backend(kind) => write!(f, "{}", kind),
        }
    }
}

/// Terminal result of a task, with the full attempt trace either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded {
        task_id: TaskId,
        backend_id: String,
        response: InvocationResponse,
        cost: CostEstimate,
        trace: Vec<FallbackRecord>,
        transitions: Vec<FallbackState>,
    },
    Failed {
        task_id: TaskId,
        last_error: FailureCause,
        trace: Vec<FallbackRecord>,
        transitions: Vec<FallbackState>,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::Succeeded { task_id, .. } | Self::Failed { task_id, .. } => task_id,
        }
    }

    pub fn trace(&self) -> &[FallbackRecord] {
        match self {
            Self::Succeeded { trace, .. } | Self::Failed { trace, .. } => trace,
        }
    }

    pub fn transitions(&self) -> &[FallbackState] {
        match self {
            Self::Succeeded { transitions, .. } | Self::Failed { transitions, .. } => transitions,
        }
    }

    /// Backend ids in attempt order.
    pub fn attempted_backends(&self) -> Vec<&str> {
        self.trace().iter().map(|r| r.backend_id.as_str()).collect()
    }
}

/// Per-task bookkeeping while the state machine runs.
struct Walk {
    task_id: TaskId,
    bucket: ComplexityBucket,
    trace: Vec<FallbackRecord>,
    transitions: Vec<FallbackState>,
}

impl Walk {
    fn enter(&mut self, state: FallbackState) {
        debug!(task_id = %self.task_id, state = ?state, "Fallback transition");
        self.transitions.push(state);
    }

    fn fail(mut self, cause: FailureCause) -> TaskOutcome {
        self.enter(FallbackState::ExhaustedFailed);
        TaskOutcome::Failed {
            task_id: self.task_id,
            last_error: cause,
            trace: self.trace,
            transitions: self.transitions,
        }
    }
}

pub struct FallbackCoordinator {
    engine: Arc<DecisionEngine>,
    adapter: Arc<dyn ExecutionAdapter>,
    policy: FallbackPolicy,
    ledger: Arc<CostLedger>,
}

impl FallbackCoordinator {
    pub fn new(
        engine: Arc<DecisionEngine>,
        adapter: Arc<dyn ExecutionAdapter>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            engine,
            adapter,
            policy,
            ledger: Arc::new(CostLedger::new()),
        }
    }

    /// Share a ledger with other coordinators or the caller.
    pub fn with_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn adapter(&self) -> &Arc<dyn ExecutionAdapter> {
        &self.adapter
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Route and run a task to a terminal outcome.
    pub async fn execute(&self, task: &mut Task) -> TaskOutcome {
        task.state = TaskState::Running;
        let outcome = self.walk(task).await;
        task.state = if outcome.is_success() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        outcome
    }

    async fn walk(&self, task: &Task) -> TaskOutcome {
        let ranking = self.engine.rank(task, &RankConstraints::for_task(task));
        let mut walk = Walk {
            task_id: task.id.clone(),
            bucket: ranking.classification.bucket,
            trace: Vec::new(),
            transitions: vec![FallbackState::Pending],
        };

        let mut remaining: VecDeque<CandidateScore> = ranking
            .candidates
            .into_iter()
            .filter(|c| c.eligible)
            .collect();

        if remaining.is_empty() {
            warn!(task_id = %task.id, "No eligible backend");
            return walk.fail(FailureCause::NoEligibleBackend);
        }

        let max_attempts = self.policy.max_fallback_attempts as usize;
        let mut configuration_cascade_spent = false;
        let mut last_error = ErrorKind::Unknown;

        while let Some(candidate) = remaining.pop_front() {
            if walk.trace.len() >= max_attempts {
                warn!(task_id = %task.id, attempts = walk.trace.len(), "Attempt budget exhausted");
                break;
            }

            walk.enter(FallbackState::Attempting {
                backend_id: candidate.backend_id.clone(),
            });
            let timeout = self.attempt_timeout(&candidate, task);
            let (response, latency_ms) = self.attempt(&candidate.backend_id, task, timeout).await;

            let kind = match response.failure_kind() {
                None => return self.succeed(walk, task, candidate, response, latency_ms, timeout),
                Some(kind) => kind,
            };

            self.observe(&candidate.backend_id, walk.bucket, latency_ms, false);
            walk.trace.push(FallbackRecord {
                backend_id: candidate.backend_id.clone(),
                outcome: AttemptOutcome::Failed(kind),
                latency_ms,
                timeout_ms: timeout.as_millis() as u64,
            });
            walk.enter(FallbackState::Cascading {
                from: candidate.backend_id.clone(),
                error_kind: kind,
            });
            last_error = kind;
            warn!(
                task_id = %task.id,
                backend = %candidate.backend_id,
                error_kind = %kind,
                attempt = walk.trace.len(),
                "Attempt failed"
            );

            match kind.cascade_class() {
                CascadeClass::BackendScoped | CascadeClass::Unknown => {}
                CascadeClass::ContextWindow => {
                    let window = candidate.context_window_tokens;
                    remaining.retain(|c| c.context_window_tokens > window);
                }
                CascadeClass::ConfigurationDefect => {
                    if configuration_cascade_spent {
                        break;
                    }
                    configuration_cascade_spent = true;
                    if remaining.iter().all(|c| c.provider == candidate.provider) {
                        break;
                    }
                    if kind == ErrorKind::AuthenticationError {
                        remaining.retain(|c| c.provider != candidate.provider);
                    }
                }
            }
        }

        walk.fail(FailureCause::Backend(last_error))
    }

    async fn attempt(
        &self,
        backend_id: &str,
        task: &Task,
        timeout: Duration,
    ) -> (InvocationResponse, u64) {
        let started = Instant::now();
        let response = match tokio::time::timeout(
            timeout,
            self.adapter.invoke(backend_id, &task.description, timeout),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => InvocationResponse::failed(ErrorKind::Timeout),
        };
        (response, started.elapsed().as_millis() as u64)
    }

    fn succeed(
        &self,
        mut walk: Walk,
        task: &Task,
        candidate: CandidateScore,
        response: InvocationResponse,
        latency_ms: u64,
        timeout: Duration,
    ) -> TaskOutcome {
        self.observe(&candidate.backend_id, walk.bucket, latency_ms, true);

        let cost = self.actual_cost(&candidate.backend_id, task, &response);
        self.ledger.record(&candidate.backend_id, &cost);

        walk.trace.push(FallbackRecord {
            backend_id: candidate.backend_id.clone(),
            outcome: AttemptOutcome::Success,
            latency_ms,
            timeout_ms: timeout.as_millis() as u64,
        });
        walk.enter(FallbackState::Succeeded {
            backend_id: candidate.backend_id.clone(),
        });
        info!(
            task_id = %task.id,
            backend = %candidate.backend_id,
            attempts = walk.trace.len(),
            latency_ms,
            cost = cost.total_cost,
            "Task succeeded"
        );

        TaskOutcome::Succeeded {
            task_id: walk.task_id,
            backend_id: candidate.backend_id,
            response,
            cost,
            trace: walk.trace,
            transitions: walk.transitions,
        }
    }

    fn attempt_timeout(&self, candidate: &CandidateScore, task: &Task) -> Duration {
        self.policy.attempt_timeout(
            candidate.predicted_latency_ms,
            task.remaining_time(Utc::now()),
        )
    }

    /// Real token counts when the adapter reports them, the estimate otherwise.
    fn actual_cost(&self, backend_id: &str, task: &Task, response: &InvocationResponse) -> CostEstimate {
        let Some(profile) = self.engine.store().get(backend_id) else {
            return CostEstimate::default();
        };
        let estimator = self.engine.estimator();
        match (response.prompt_tokens, response.completion_tokens) {
            (Some(prompt), Some(completion)) => estimator.actual(&profile, prompt, completion),
            _ => estimator.estimate(&profile, task.estimated_input_size),
        }
    }

    fn observe(&self, backend_id: &str, bucket: ComplexityBucket, latency_ms: u64, success: bool) {
        let observation = Observation {
            bucket,
            quality: None,
            latency_ms,
            success,
        };
        if let Err(e) = self.engine.store().update(backend_id, observation) {
            warn!(backend = backend_id, error = %e, "Failed to record observation");
        }
    }
}
