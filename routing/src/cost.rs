//! Cost estimation and accounting
//!
//! Estimates are made before a call from the prompt size; the ledger
//! records actual spend once real token counts are known. Free backends
//! cost exactly zero either way.

use crate::config::CostConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::profile::{ModelProfile, ProfileStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Token counts and the costs derived from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CostEstimator {
    config: CostConfig,
}

impl CostEstimator {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    /// Expected cost of sending `prompt_tokens` to the profile's backend.
    pub fn estimate(&self, profile: &ModelProfile, prompt_tokens: u64) -> CostEstimate {
        let completion_tokens = (prompt_tokens as f64 * self.config.completion_ratio).round() as u64;
        self.priced(profile, prompt_tokens, completion_tokens)
    }

    /// Estimate by backend id.
    pub fn estimate_for(
        &self,
        store: &ProfileStore,
        backend_id: &str,
        prompt_tokens: u64,
    ) -> RoutingResult<CostEstimate> {
        let profile = store
            .get(backend_id)
            .ok_or_else(|| RoutingError::ProfileNotFound(backend_id.to_string()))?;
        Ok(self.estimate(&profile, prompt_tokens))
    }

    /// Cost of a finished call from its real token counts.
    pub fn actual(
        &self,
        profile: &ModelProfile,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> CostEstimate {
        self.priced(profile, prompt_tokens, completion_tokens)
    }

    fn priced(&self, profile: &ModelProfile, prompt_tokens: u64, completion_tokens: u64) -> CostEstimate {
        if profile.is_free {
            return CostEstimate {
                prompt_tokens,
                completion_tokens,
                ..CostEstimate::default()
            };
        }
        let prompt_cost = prompt_tokens as f64 * profile.cost_per_token.prompt;
        let completion_cost = completion_tokens as f64 * profile.cost_per_token.completion;
        CostEstimate {
            prompt_tokens,
            completion_tokens,
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
        }
    }
}

/// Accumulated spend for one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSpend {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
}

/// Running total of actual spend per backend.
#[derive(Debug, Default)]
pub struct CostLedger {
    entries: Mutex<BTreeMap<String, BackendSpend>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, backend_id: &str, cost: &CostEstimate) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let spend = entries.entry(backend_id.to_string()).or_default();
        spend.calls += 1;
        spend.prompt_tokens += cost.prompt_tokens;
        spend.completion_tokens += cost.completion_tokens;
        spend.total_cost += cost.total_cost;
    }

    /// Per-backend totals, sorted by backend id.
    pub fn snapshot(&self) -> BTreeMap<String, BackendSpend> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total_cost(&self) -> f64 {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.total_cost)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid() -> ModelProfile {
        ModelProfile::new("paid", "acme", 128_000).with_pricing(0.00001, 0.00003)
    }

    #[test]
    fn test_free_backend_costs_zero() {
        let estimator = CostEstimator::default();
        let free = ModelProfile::new("local", "ollama", 8_192)
            .with_pricing(1.0, 1.0)
            .free();
        for tokens in [0, 1, 1_000, 10_000_000, u32::MAX as u64] {
            let est = estimator.estimate(&free, tokens);
            assert_eq!(est.total_cost, 0.0);
            assert_eq!(est.prompt_cost, 0.0);
            assert_eq!(est.completion_cost, 0.0);
        }
    }

    #[test]
    fn test_completion_tokens_use_ratio() {
        let est = CostEstimator::default().estimate(&paid(), 1_000);
        assert_eq!(est.completion_tokens, 800);
        assert!((est.prompt_cost - 0.01).abs() < 1e-12);
        assert!((est.completion_cost - 0.024).abs() < 1e-12);
        assert!((est.total_cost - 0.034).abs() < 1e-12);
    }

    #[test]
    fn test_actual_supersedes_ratio() {
        let est = CostEstimator::default().actual(&paid(), 1_000, 50);
        assert_eq!(est.completion_tokens, 50);
        assert!((est.total_cost - 0.0115).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_for_unknown_backend() {
        let store = ProfileStore::default();
        assert!(matches!(
            CostEstimator::default().estimate_for(&store, "nope", 10),
            Err(RoutingError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_ledger_accumulates() {
        let ledger = CostLedger::new();
        let estimator = CostEstimator::default();
        ledger.record("paid", &estimator.actual(&paid(), 100, 100));
        ledger.record("paid", &estimator.actual(&paid(), 100, 100));
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot["paid"].calls, 2);
        assert_eq!(snapshot["paid"].prompt_tokens, 200);
        assert!((ledger.total_cost() - 0.008).abs() < 1e-12);
    }
}
