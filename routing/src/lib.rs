//! Complexity-aware model routing core
//!
//! This library provides:
//! - Empirical per-backend profiles updated from live and benchmark traffic
//! - Heuristic task classification and cost estimation
//! - Candidate ranking with capability, budget and deadline filters
//! - Cascading fallback with per-error-kind policy
//! - A bounded-concurrency FIFO task executor
//! - A benchmark harness with durable JSON records
//!
//! # Flow
//!
//! ```text
//! Task ──► TaskExecutor ──► FallbackCoordinator ──► DecisionEngine
//!                                   │                 ├─ TaskClassifier
//!                                   │                 ├─ CostEstimator
//!                                   │                 └─ ProfileStore
//!                                   ▼
//!                           ExecutionAdapter ──► observation ──► ProfileStore
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod adapter;
pub mod benchmark;
pub mod classifier;
pub mod config;
pub mod cost;
pub mod decision;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod profile;
pub mod task;

// Re-export key routing types
pub use adapter::{ExecutionAdapter, InvocationResponse, SimulatedAdapter};
pub use classifier::{Classification, SignalBreakdown, TaskClassifier};
pub use cost::{BackendSpend, CostEstimate, CostEstimator, CostLedger};
pub use decision::{CandidateScore, DecisionEngine, RankConstraints, Ranking};
pub use error::{CascadeClass, ErrorKind, RoutingError, RoutingResult};
pub use fallback::{
    AttemptOutcome, FailureCause, FallbackCoordinator, FallbackRecord, FallbackState, TaskOutcome,
};
pub use task::{estimate_tokens, Capability, Task, TaskId, TaskState};

// Re-export configuration types
pub use config::{
    BenchmarkConfig, ClassifierConfig, CostConfig, ExecutorConfig, FallbackPolicy,
    ProfileUpdateConfig, RoutingConfig, ScoringWeights, MAX_ATTEMPT_TIMEOUT,
};

// Re-export profile types
pub use profile::{
    ComplexityBucket, ComplexityRange, ModelProfile, Observation, ProfileStore,
    SharedProfileStore, TokenPricing,
};

// Re-export executor and benchmark types
pub use benchmark::{
    summarize, BenchmarkHarness, BenchmarkResult, BenchmarkStore, BenchmarkSummary, QualityJudge,
};
pub use executor::{ExecutorStats, TaskExecutor, TaskHandle};
