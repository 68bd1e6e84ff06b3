//! Routing configuration
//!
//! Every tunable (scoring weights, EMA coefficients, fallback budget,
//! concurrency bounds) has a default. Defaults can be overridden from
//! `ROUTING_*` environment variables or a TOML document, then checked
//! with [`RoutingConfig::validate`].

use crate::error::{RoutingError, RoutingResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Weights for the candidate scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub quality: f64,
    pub cost: f64,
    pub latency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            quality: 0.6,
            cost: 0.25,
            latency: 0.15,
        }
    }
}

/// Coefficients of the profile update rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileUpdateConfig {
    /// EMA weight for latency and per-bucket quality
    pub alpha: f64,
    /// Weight of the newest observation in the success-rate estimator
    pub beta: f64,
}

impl Default for ProfileUpdateConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            beta: 0.1,
        }
    }
}

/// Upper bound on a single attempt, whatever the profile's latency says.
pub const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(600);

/// Cascade budget and per-attempt timeout derivation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    /// Total attempts allowed for one task across all backends
    pub max_fallback_attempts: u32,
    /// Attempt timeout = avg response time × this factor
    pub timeout_safety_factor: f64,
    /// Timeout for a backend with no latency history yet
    pub min_attempt_timeout_ms: u64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_fallback_attempts: 3,
            timeout_safety_factor: 3.0,
            min_attempt_timeout_ms: 1_000,
        }
    }
}

impl FallbackPolicy {
    /// Per-attempt timeout for a backend averaging `avg_response_time_ms`,
    /// capped by the task's remaining deadline when it has one.
    ///
    /// An unseeded average (zero) gets `min_attempt_timeout_ms`. Products too
    /// large for a `Duration` saturate at [`MAX_ATTEMPT_TIMEOUT`].
    pub fn attempt_timeout(&self, avg_response_time_ms: f64, remaining: Option<Duration>) -> Duration {
        let derived = if avg_response_time_ms.is_finite() && avg_response_time_ms > 0.0 {
            Duration::try_from_secs_f64(avg_response_time_ms * self.timeout_safety_factor / 1_000.0)
                .unwrap_or(MAX_ATTEMPT_TIMEOUT)
                .min(MAX_ATTEMPT_TIMEOUT)
        } else {
            Duration::from_millis(self.min_attempt_timeout_ms)
        };
        match remaining {
            Some(remaining) => derived.min(remaining),
            None => derived,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_concurrent_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Directory holding one JSON file per result / summary
    pub results_dir: PathBuf,
    /// Separate (smaller) bound for harness runs; `None` shares the live executor
    pub max_concurrent: Option<usize>,
    /// Optional filename prefix for summary records
    pub summary_prefix: Option<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("benchmark_results"),
            max_concurrent: None,
            summary_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Completion tokens estimated as this fraction of prompt tokens
    pub completion_ratio: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            completion_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Prompts above this many tokens get the length signal
    pub long_prompt_tokens: u64,
    /// Prompts above this many tokens require the long-context capability
    pub long_context_tokens: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            long_prompt_tokens: 500,
            long_context_tokens: 32_000,
        }
    }
}

/// Top-level configuration for the routing core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub scoring: ScoringWeights,
    pub profile_update: ProfileUpdateConfig,
    pub fallback: FallbackPolicy,
    pub executor: ExecutorConfig,
    pub benchmark: BenchmarkConfig,
    pub cost: CostConfig,
    pub classifier: ClassifierConfig,
}

impl RoutingConfig {
    /// Defaults overlaid with `ROUTING_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok());
        config
    }

    /// Parse a TOML document; absent sections keep their defaults.
    pub fn from_toml_str(raw: &str) -> RoutingResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from any key/value source (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "ROUTING_WEIGHT_QUALITY", &mut self.scoring.quality);
        override_from(&lookup, "ROUTING_WEIGHT_COST", &mut self.scoring.cost);
        override_from(&lookup, "ROUTING_WEIGHT_LATENCY", &mut self.scoring.latency);
        override_from(&lookup, "ROUTING_EMA_ALPHA", &mut self.profile_update.alpha);
        override_from(&lookup, "ROUTING_SUCCESS_BETA", &mut self.profile_update.beta);
        override_from(
            &lookup,
            "ROUTING_MAX_FALLBACK_ATTEMPTS",
            &mut self.fallback.max_fallback_attempts,
        );
        override_from(
            &lookup,
            "ROUTING_TIMEOUT_SAFETY_FACTOR",
            &mut self.fallback.timeout_safety_factor,
        );
        override_from(
            &lookup,
            "ROUTING_MAX_CONCURRENT_TASKS",
            &mut self.executor.max_concurrent_tasks,
        );
        override_from(
            &lookup,
            "ROUTING_COMPLETION_RATIO",
            &mut self.cost.completion_ratio,
        );
        if let Some(dir) = lookup("ROUTING_RESULTS_DIR") {
            self.benchmark.results_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("ROUTING_BENCH_MAX_CONCURRENT") {
            match raw.parse() {
                Ok(n) => self.benchmark.max_concurrent = Some(n),
                Err(_) => warn!(var = "ROUTING_BENCH_MAX_CONCURRENT", value = %raw, "Ignoring unparsable override"),
            }
        }
    }

    /// Reject configurations the routing core cannot run with.
    pub fn validate(&self) -> RoutingResult<()> {
        let w = &self.scoring;
        if [w.quality, w.cost, w.latency]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(RoutingError::InvalidConfig(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        if w.quality + w.cost + w.latency <= 0.0 {
            return Err(RoutingError::InvalidConfig(
                "at least one scoring weight must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("alpha", self.profile_update.alpha),
            ("beta", self.profile_update.beta),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(RoutingError::InvalidConfig(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.fallback.max_fallback_attempts == 0 {
            return Err(RoutingError::InvalidConfig(
                "max_fallback_attempts must be at least 1".to_string(),
            ));
        }
        let factor = self.fallback.timeout_safety_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(RoutingError::InvalidConfig(format!(
                "timeout_safety_factor must be finite and >= 1, got {}",
                self.fallback.timeout_safety_factor
            )));
        }
        if self.executor.max_concurrent_tasks == 0 || self.benchmark.max_concurrent == Some(0) {
            return Err(RoutingError::InvalidConfig(
                "concurrency bounds must be at least 1".to_string(),
            ));
        }
        if !self.cost.completion_ratio.is_finite() || self.cost.completion_ratio < 0.0 {
            return Err(RoutingError::InvalidConfig(
                "completion_ratio must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str, target: &mut T) {
    if let Some(raw) = lookup(var) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(var, value = %raw, "Ignoring unparsable override"),
        }
    }
}
