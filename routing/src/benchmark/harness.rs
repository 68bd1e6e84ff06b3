//! Benchmark harness
//!
//! Runs every sample task against every selected backend, one direct call
//! per pair with no fallback, and feeds each outcome back into the profile
//! store through the normal update rule. Jobs go through a [`TaskExecutor`],
//! either the live one or a smaller dedicated one, so benchmarking cannot
//! exceed its concurrency bound.
//!
//! Persisting records is best-effort: a failed write is logged and the
//! result is still returned.

use super::store::BenchmarkStore;
use super::types::{BenchmarkResult, BenchmarkSummary};
use crate::adapter::{ExecutionAdapter, InvocationResponse};
use crate::classifier::TaskClassifier;
use crate::config::{BenchmarkConfig, ExecutorConfig, FallbackPolicy};
use crate::error::{ErrorKind, RoutingError, RoutingResult};
use crate::executor::{TaskExecutor, TaskHandle};
use crate::profile::{Observation, SharedProfileStore};
use crate::task::Task;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// External quality signal for a successful response.
///
/// Returns a score in [0, 1], or `None` when the response cannot be judged.
#[async_trait]
pub trait QualityJudge: Send + Sync {
    async fn judge(&self, task: &Task, backend_id: &str, response: &InvocationResponse)
        -> Option<f64>;
}

/// Everything one benchmark job needs, cloned into the spawned future.
#[derive(Clone)]
struct JobContext {
    adapter: Arc<dyn ExecutionAdapter>,
    profiles: SharedProfileStore,
    classifier: TaskClassifier,
    policy: FallbackPolicy,
    judge: Option<Arc<dyn QualityJudge>>,
    records: Option<BenchmarkStore>,
}

pub struct BenchmarkHarness {
    executor: TaskExecutor,
    context: JobContext,
    summary_prefix: Option<String>,
}

impl BenchmarkHarness {
    /// Harness sharing `executor`'s admission control.
    pub fn new(executor: TaskExecutor) -> Self {
        let coordinator = Arc::clone(executor.coordinator());
        let engine = coordinator.engine();
        let context = JobContext {
            adapter: Arc::clone(coordinator.adapter()),
            profiles: Arc::clone(engine.store()),
            classifier: engine.classifier().clone(),
            policy: *coordinator.policy(),
            judge: None,
            records: None,
        };
        Self {
            executor,
            context,
            summary_prefix: None,
        }
    }

    /// Harness configured from [`BenchmarkConfig`]: a dedicated executor when
    /// `max_concurrent` is set, records persisted under `results_dir`.
    pub fn from_config(live: &TaskExecutor, config: &BenchmarkConfig) -> Self {
        let executor = match config.max_concurrent {
            Some(max_concurrent_tasks) => TaskExecutor::new(
                Arc::clone(live.coordinator()),
                ExecutorConfig {
                    max_concurrent_tasks,
                },
            ),
            None => live.clone(),
        };
        let mut harness =
            Self::new(executor).with_store(BenchmarkStore::new(config.results_dir.clone()));
        harness.summary_prefix = config.summary_prefix.clone();
        harness
    }

    pub fn with_judge(mut self, judge: Arc<dyn QualityJudge>) -> Self {
        self.context.judge = Some(judge);
        self
    }

    pub fn with_store(mut self, store: BenchmarkStore) -> Self {
        self.context.records = Some(store);
        self
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Run every task against every backend. Results come back in
    /// task-major order regardless of completion order.
    pub async fn run(
        &self,
        backend_ids: &[String],
        sample_tasks: &[Task],
    ) -> RoutingResult<Vec<BenchmarkResult>> {
        for backend_id in backend_ids {
            if self.context.profiles.get(backend_id).is_none() {
                return Err(RoutingError::ProfileNotFound(backend_id.clone()));
            }
        }

        info!(
            backends = backend_ids.len(),
            tasks = sample_tasks.len(),
            max_concurrent = self.executor.max_concurrent_tasks(),
            "Benchmark run started"
        );

        let jobs: Vec<(&Task, &String, TaskHandle<BenchmarkResult>)> = sample_tasks
            .iter()
            .flat_map(|task| backend_ids.iter().map(move |b| (task, b)))
            .map(|(task, backend_id)| {
                let context = self.context.clone();
                let owned_task = task.clone();
                let owned_backend = backend_id.clone();
                let handle = self.executor.submit_job(task.id.clone(), async move {
                    context.run_one(owned_task, owned_backend).await
                });
                (task, backend_id, handle)
            })
            .collect();

        // A job that dies without a result is reported as a failed pair so
        // the rest of the batch survives.
        let mut results = Vec::with_capacity(jobs.len());
        for (task, backend_id, handle) in jobs {
            match handle.outcome().await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(task_id = %task.id, backend = %backend_id, error = %e, "Benchmark job produced no result");
                    results.push(BenchmarkResult {
                        task_id: task.id.clone(),
                        backend_id: backend_id.clone(),
                        success: false,
                        latency_ms: 0,
                        prompt_tokens: task.estimated_input_size,
                        completion_tokens: 0,
                        error_kind: Some(ErrorKind::Unknown),
                        timestamp: Utc::now(),
                        quality_score: None,
                    });
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(results = results.len(), succeeded, "Benchmark run finished");
        Ok(results)
    }

    /// Summarize results and persist one summary record per backend.
    pub fn finish(&self, results: &[BenchmarkResult]) -> Vec<BenchmarkSummary> {
        let summaries = summarize(results);
        if let Some(records) = &self.context.records {
            for summary in &summaries {
                if let Err(e) = records.save_summary(summary, self.summary_prefix.as_deref()) {
                    warn!(backend = %summary.backend_id, error = %e, "Failed to persist benchmark summary");
                }
            }
        }
        summaries
    }
}

impl JobContext {
    async fn run_one(self, task: Task, backend_id: String) -> BenchmarkResult {
        let bucket = self.classifier.classify(&task).bucket;
        let avg_ms = self
            .profiles
            .get(&backend_id)
            .map(|p| p.avg_response_time_ms)
            .unwrap_or_default();
        let timeout = self.policy.attempt_timeout(avg_ms, None);

        let started = Instant::now();
        let response = match tokio::time::timeout(
            timeout,
            self.adapter.invoke(&backend_id, &task.description, timeout),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => InvocationResponse::failed(ErrorKind::Timeout),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let quality_score = match (&self.judge, response.success) {
            (Some(judge), true) => judge
                .judge(&task, &backend_id, &response)
                .await
                .map(|q| q.clamp(0.0, 1.0)),
            _ => None,
        };

        let observation = Observation {
            bucket,
            quality: quality_score,
            latency_ms,
            success: response.success,
        };
        if let Err(e) = self.profiles.update(&backend_id, observation) {
            warn!(backend = %backend_id, error = %e, "Failed to record benchmark observation");
        }

        let result = BenchmarkResult {
            task_id: task.id.clone(),
            backend_id,
            success: response.success,
            latency_ms,
            prompt_tokens: response.prompt_tokens.unwrap_or(task.estimated_input_size),
            completion_tokens: response.completion_tokens.unwrap_or(0),
            error_kind: response.failure_kind(),
            timestamp: Utc::now(),
            quality_score,
        };

        if let Some(records) = &self.records {
            if let Err(e) = records.save_result(&result) {
                warn!(task_id = %result.task_id, backend = %result.backend_id, error = %e, "Failed to persist benchmark result");
            }
        }
        result
    }
}

/// Aggregate results per backend, sorted by backend id.
///
/// The quality estimate averages the judged results only and is 0.0 when
/// no result for the backend was judged.
pub fn summarize(results: &[BenchmarkResult]) -> Vec<BenchmarkSummary> {
    let mut by_backend: BTreeMap<&str, Vec<&BenchmarkResult>> = BTreeMap::new();
    for result in results {
        by_backend
            .entry(result.backend_id.as_str())
            .or_default()
            .push(result);
    }

    let generated_at = Utc::now();
    by_backend
        .into_iter()
        .map(|(backend_id, rows)| {
            let n = rows.len() as f64;
            let successes = rows.iter().filter(|r| r.success).count() as f64;
            let total_latency: u64 = rows.iter().map(|r| r.latency_ms).sum();
            let judged: Vec<f64> = rows.iter().filter_map(|r| r.quality_score).collect();
            let avg_quality_estimate = if judged.is_empty() {
                0.0
            } else {
                judged.iter().sum::<f64>() / judged.len() as f64
            };

            BenchmarkSummary {
                backend_id: backend_id.to_string(),
                sample_count: rows.len(),
                success_rate: successes / n,
                avg_latency_ms: total_latency as f64 / n,
                avg_quality_estimate,
                generated_at,
            }
        })
        .collect()
}
