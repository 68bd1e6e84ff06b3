//! Decision Engine: ranks candidate backends for a task
//!
//! # Ranking
//!
//! ```text
//! profiles ──capability filter──► candidates
//!                                    │
//!                 ┌──────────────────┴──────────────────┐
//!            in-range (complexity ∈ range)        out-of-range
//!                 │                                     │
//!      score = w_q·quality − w_c·cost/max − w_l·latency/max
//!                 │                                     │
//!          sort desc, tie-break                 sort desc, tie-break
//!                 └──────────────► concat ◄─────────────┘
//! ```
//!
//! In-range candidates always precede out-of-range ones: quality estimates
//! outside a profile's validated range are not trusted enough to compete.
//! Candidates that break the cost or deadline budget stay in the output
//! with `eligible = false` and a reason.
//!
//! Ties: higher success rate, then lower average latency, then backend id.

use crate::classifier::{Classification, TaskClassifier};
use crate::config::ScoringWeights;
use crate::cost::CostEstimator;
use crate::profile::{ModelProfile, SharedProfileStore};
use crate::task::{Task, TaskId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::debug;

/// Per-request budget limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankConstraints {
    pub max_cost: Option<f64>,
    /// Time remaining until the task's deadline
    pub deadline: Option<Duration>,
}

impl RankConstraints {
    /// Constraints carried by the task itself, with the deadline measured from now.
    pub fn for_task(task: &Task) -> Self {
        Self {
            max_cost: task.max_cost,
            deadline: task.remaining_time(Utc::now()),
        }
    }
}

/// Scored candidate; produced per ranking request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub backend_id: String,
    pub predicted_quality: f64,
    pub predicted_latency_ms: f64,
    pub predicted_cost: f64,
    pub score: f64,
    pub in_range: bool,
    pub eligible: bool,
    pub reason: Option<String>,
    pub success_rate: f64,
    pub context_window_tokens: u64,
    /// Authentication domain
    pub provider: String,
}

/// Ordered candidates for one task, most preferred first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranking {
    pub task_id: TaskId,
    pub classification: Classification,
    pub candidates: Vec<CandidateScore>,
}

impl Ranking {
    pub fn eligible(&self) -> impl Iterator<Item = &CandidateScore> {
        self.candidates.iter().filter(|c| c.eligible)
    }

    /// Most preferred eligible candidate.
    pub fn top(&self) -> Option<&CandidateScore> {
        self.eligible().next()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

pub struct DecisionEngine {
    store: SharedProfileStore,
    classifier: TaskClassifier,
    estimator: CostEstimator,
    weights: ScoringWeights,
}

impl DecisionEngine {
    pub fn new(
        store: SharedProfileStore,
        classifier: TaskClassifier,
        estimator: CostEstimator,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            store,
            classifier,
            estimator,
            weights,
        }
    }

    pub fn store(&self) -> &SharedProfileStore {
        &self.store
    }

    pub fn classifier(&self) -> &TaskClassifier {
        &self.classifier
    }

    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    /// Classify and rank.
    ///
    /// An empty ranking means no profile satisfies the task's capabilities;
    /// the caller must fail the task with `NoEligibleBackend`.
    pub fn rank(&self, task: &Task, constraints: &RankConstraints) -> Ranking {
        let classification = self.classifier.classify(task);
        self.rank_classified(task, classification, constraints)
    }

    /// Rank with a precomputed classification.
    pub fn rank_classified(
        &self,
        task: &Task,
        classification: Classification,
        constraints: &RankConstraints,
    ) -> Ranking {
        let profiles = self
            .store
            .list_eligible(&classification.required_capabilities);

        let raw: Vec<(ModelProfile, f64)> = profiles
            .into_iter()
            .map(|p| {
                let cost = self
                    .estimator
                    .estimate(&p, task.estimated_input_size)
                    .total_cost;
                (p, cost)
            })
            .collect();

        let max_cost = raw.iter().map(|(_, c)| *c).fold(0.0_f64, f64::max);
        let max_latency = raw
            .iter()
            .map(|(p, _)| p.avg_response_time_ms)
            .fold(0.0_f64, f64::max);

        let mut candidates: Vec<CandidateScore> = raw
            .iter()
            .map(|(profile, cost)| {
                self.score(
                    profile,
                    *cost,
                    &classification,
                    constraints,
                    max_cost,
                    max_latency,
                )
            })
            .collect();

        candidates.sort_by(compare_candidates);

        debug!(
            task_id = %task.id,
            complexity = classification.complexity,
            bucket = %classification.bucket,
            candidates = candidates.len(),
            top = candidates.first().map(|c| c.backend_id.as_str()).unwrap_or("none"),
            "Ranked candidates"
        );

        Ranking {
            task_id: task.id.clone(),
            classification,
            candidates,
        }
    }

    fn score(
        &self,
        profile: &ModelProfile,
        cost: f64,
        classification: &Classification,
        constraints: &RankConstraints,
        max_cost: f64,
        max_latency: f64,
    ) -> CandidateScore {
        let quality = profile.predicted_quality(classification.bucket);
        let latency = profile.avg_response_time_ms;
        let norm_cost = normalize(cost, max_cost);
        let norm_latency = normalize(latency, max_latency);
        let score = self.weights.quality * quality
            - self.weights.cost * norm_cost
            - self.weights.latency * norm_latency;

        let mut reason = None;
        if let Some(limit) = constraints.max_cost {
            if cost > limit {
                reason = Some(format!("estimated cost {:.6} exceeds limit {:.6}", cost, limit));
            }
        }
        if reason.is_none() {
            if let Some(remaining) = constraints.deadline {
                let remaining_ms = remaining.as_secs_f64() * 1_000.0;
                if latency > remaining_ms {
                    reason = Some(format!(
                        "average latency {:.0}ms exceeds remaining {:.0}ms",
                        latency, remaining_ms
                    ));
                }
            }
        }

        CandidateScore {
            backend_id: profile.backend_id.clone(),
            predicted_quality: quality,
            predicted_latency_ms: latency,
            predicted_cost: cost,
            score,
            in_range: profile.in_range(classification.complexity),
            eligible: reason.is_none(),
            reason,
            success_rate: profile.success_rate,
            context_window_tokens: profile.context_window_tokens,
            provider: profile.provider.clone(),
        }
    }
}

fn normalize(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        0.0
    }
}

/// Total order: in-range first, then score, success rate, latency, id.
fn compare_candidates(a: &CandidateScore, b: &CandidateScore) -> Ordering {
    b.in_range
        .cmp(&a.in_range)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| b.success_rate.total_cmp(&a.success_rate))
        .then_with(|| a.predicted_latency_ms.total_cmp(&b.predicted_latency_ms))
        .then_with(|| a.backend_id.cmp(&b.backend_id))
}
