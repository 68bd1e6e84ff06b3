//! Task Executor: bounded-concurrency FIFO admission
//!
//! ```text
//! submit ──► [ queue (FIFO) ] ──admit while in_flight < max──► spawned job
//!               ▲                                                  │
//!               └───────── Admission guard dropped ◄───────────────┘
//!                          (success, failure or panic)
//! ```
//!
//! Every admitted job owns an [`Admission`] guard. Dropping it removes the
//! job from the in-flight set and admits the next queued job, so the queue
//! keeps draining even when a job's future panics.
//!
//! Only queued jobs can be cancelled. An admitted job runs to completion.

use crate::config::ExecutorConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::fallback::{FallbackCoordinator, TaskOutcome};
use crate::task::{Task, TaskId, TaskState};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub queued: usize,
    pub in_flight: usize,
    /// Highest in-flight count seen since construction
    pub peak_in_flight: usize,
    pub completed: u64,
    pub cancelled: u64,
}

struct QueuedJob {
    job_id: u64,
    task_id: TaskId,
    future: BoxFuture<'static, ()>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<QueuedJob>,
    in_flight: HashMap<u64, TaskId>,
    next_job_id: u64,
    stats: ExecutorStats,
    closed: bool,
}

struct Inner {
    max_in_flight: usize,
    state: Mutex<SchedulerState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases an in-flight slot on drop and admits the next queued job.
struct Admission {
    inner: Arc<Inner>,
    job_id: u64,
}

impl Drop for Admission {
    fn drop(&mut self) {
        {
            let mut state = self.inner.lock();
            if let Some(task_id) = state.in_flight.remove(&self.job_id) {
                state.stats.completed += 1;
                debug!(task_id = %task_id, in_flight = state.in_flight.len(), "Task left executor");
            }
        }
        pump(&self.inner);
    }
}

/// Admit queued jobs until the bound is reached or the queue is empty.
fn pump(inner: &Arc<Inner>) {
    let Ok(runtime) = Handle::try_current() else {
        warn!("No tokio runtime available; queued tasks stay queued");
        return;
    };

    let admitted: Vec<QueuedJob> = {
        let mut state = inner.lock();
        let mut admitted = Vec::new();
        while state.in_flight.len() < inner.max_in_flight {
            let Some(job) = state.queue.pop_front() else {
                break;
            };
            state.in_flight.insert(job.job_id, job.task_id.clone());
            state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.in_flight.len());
            admitted.push(job);
        }
        admitted
    };

    for job in admitted {
        debug!(task_id = %job.task_id, "Task admitted");
        let admission = Admission {
            inner: Arc::clone(inner),
            job_id: job.job_id,
        };
        runtime.spawn(async move {
            let _admission = admission;
            job.future.await;
        });
    }
}

/// Receives the result of one submitted job.
#[derive(Debug)]
pub struct TaskHandle<T> {
    task_id: TaskId,
    job_id: u64,
    receiver: oneshot::Receiver<T>,
    cancelled: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait for the job's result.
    ///
    /// Fails with `Cancelled` if the job was cancelled while queued, or
    /// `ExecutorClosed` if it was dropped without producing a value.
    pub async fn outcome(self) -> RoutingResult<T> {
        match self.receiver.await {
            Ok(value) => Ok(value),
            Err(_) if self.cancelled.load(Ordering::SeqCst) => {
                Err(RoutingError::Cancelled(self.task_id))
            }
            Err(_) => Err(RoutingError::ExecutorClosed),
        }
    }
}

/// Routes submitted tasks through a [`FallbackCoordinator`] with at most
/// `max_concurrent_tasks` in flight.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
    coordinator: Arc<FallbackCoordinator>,
}

impl TaskExecutor {
    pub fn new(coordinator: Arc<FallbackCoordinator>, config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_in_flight: config.max_concurrent_tasks.max(1),
                state: Mutex::new(SchedulerState::default()),
            }),
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<FallbackCoordinator> {
        &self.coordinator
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.max_in_flight
    }

    /// Queue a task for routing. Must be called from within a tokio runtime.
    pub fn submit(&self, mut task: Task) -> TaskHandle<TaskOutcome> {
        let task_id = task.id.clone();
        task.state = TaskState::Queued;
        let coordinator = Arc::clone(&self.coordinator);
        self.submit_job(task_id, async move { coordinator.execute(&mut task).await })
    }

    /// Queue an arbitrary job under the same admission control.
    pub fn submit_job<F, T>(&self, task_id: TaskId, job: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let future = async move {
            let value = job.await;
            let _ = sender.send(value);
        }
        .boxed();

        let job_id = {
            let mut state = self.inner.lock();
            let job_id = state.next_job_id;
            state.next_job_id += 1;
            if state.closed {
                warn!(task_id = %task_id, "Submit after shutdown");
            } else {
                state.queue.push_back(QueuedJob {
                    job_id,
                    task_id: task_id.clone(),
                    future,
                    cancelled: Arc::clone(&cancelled),
                });
                debug!(task_id = %task_id, queued = state.queue.len(), "Task queued");
            }
            job_id
        };

        pump(&self.inner);

        TaskHandle {
            task_id,
            job_id,
            receiver,
            cancelled,
        }
    }

    /// Remove a still-queued job. Returns `false` once it has been admitted or finished.
    pub fn cancel<T>(&self, handle: &TaskHandle<T>) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            let position = state.queue.iter().position(|j| j.job_id == handle.job_id);
            let removed = position.and_then(|i| state.queue.remove(i));
            if removed.is_some() {
                state.stats.cancelled += 1;
            }
            removed
        };

        match removed {
            Some(job) => {
                job.cancelled.store(true, Ordering::SeqCst);
                debug!(task_id = %job.task_id, "Task cancelled while queued");
                // Dropping the future drops its sender.
                drop(job);
                true
            }
            None => false,
        }
    }

    /// `Queued` or `Running` for live tasks, `None` otherwise.
    pub fn state(&self, task_id: &TaskId) -> Option<TaskState> {
        let state = self.inner.lock();
        if state.in_flight.values().any(|id| id == task_id) {
            Some(TaskState::Running)
        } else if state.queue.iter().any(|j| &j.task_id == task_id) {
            Some(TaskState::Queued)
        } else {
            None
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let state = self.inner.lock();
        ExecutorStats {
            queued: state.queue.len(),
            in_flight: state.in_flight.len(),
            ..state.stats
        }
    }

    /// Stop accepting work and drop everything still queued. In-flight jobs finish.
    pub fn shutdown(&self) {
        let dropped: Vec<QueuedJob> = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.queue.drain(..).collect()
        };
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "Dropping queued tasks on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ExecutionAdapter, SimulatedAdapter};
    use crate::classifier::TaskClassifier;
    use crate::config::{FallbackPolicy, ProfileUpdateConfig, ScoringWeights};
    use crate::cost::CostEstimator;
    use crate::decision::DecisionEngine;
    use crate::profile::{ModelProfile, ProfileStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn executor(max: usize) -> TaskExecutor {
        let store = ProfileStore::with_profiles(
            ProfileUpdateConfig::default(),
            [ModelProfile::new("local", "ollama", 8_192).free()],
        )
        .unwrap()
        .shared();
        let engine = Arc::new(DecisionEngine::new(
            store,
            TaskClassifier::default(),
            CostEstimator::default(),
            ScoringWeights::default(),
        ));
        let adapter: Arc<dyn ExecutionAdapter> =
            Arc::new(SimulatedAdapter::new().with_backend("local", Duration::from_millis(200)));
        let coordinator = Arc::new(FallbackCoordinator::new(
            engine,
            adapter,
            FallbackPolicy::default(),
        ));
        TaskExecutor::new(
            coordinator,
            ExecutorConfig {
                max_concurrent_tasks: max,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_bound() {
        let executor = executor(2);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                executor.submit_job(TaskId::from(format!("job-{}", i)), async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.outcome().await.unwrap());
        }

        assert_eq!(results, (0..10).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let stats = executor.stats();
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_admission_order() {
        let executor = executor(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                executor.submit_job(TaskId::from(format!("job-{}", i)), async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                })
            })
            .collect();
        for handle in handles {
            handle.outcome().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_only_while_queued() {
        let executor = executor(1);
        let first = executor.submit(Task::new("first").with_id("t1"));
        let second = executor.submit(Task::new("second").with_id("t2"));

        tokio::task::yield_now().await;
        assert_eq!(executor.state(&TaskId::from("t1")), Some(TaskState::Running));
        assert_eq!(executor.state(&TaskId::from("t2")), Some(TaskState::Queued));

        assert!(!executor.cancel(&first));
        assert!(executor.cancel(&second));
        assert!(!executor.cancel(&second));

        assert!(matches!(
            second.outcome().await,
            Err(RoutingError::Cancelled(id)) if id.as_str() == "t2"
        ));
        let outcome = first.outcome().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(executor.stats().cancelled, 1);
        assert_eq!(executor.state(&TaskId::from("t1")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_releases_slot() {
        let executor = executor(1);
        let boom = executor.submit_job(TaskId::from("boom"), async {
            panic!("job failed");
        });
        let next = executor.submit_job(TaskId::from("next"), async { 7 });

        assert!(matches!(boom.outcome().await, Err(RoutingError::ExecutorClosed)));
        assert_eq!(next.outcome().await.unwrap(), 7);
        assert_eq!(executor.stats().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_queue() {
        let executor = executor(1);
        let running = executor.submit_job(TaskId::from("a"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            1
        });
        let queued = executor.submit_job(TaskId::from("b"), async { 2 });
        executor.shutdown();
        let late = executor.submit_job(TaskId::from("c"), async { 3 });

        assert_eq!(running.outcome().await.unwrap(), 1);
        assert!(matches!(queued.outcome().await, Err(RoutingError::ExecutorClosed)));
        assert!(matches!(late.outcome().await, Err(RoutingError::ExecutorClosed)));
    }
}
