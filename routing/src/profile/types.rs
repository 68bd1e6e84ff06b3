//! Profile data types and the update rule

use crate::config::ProfileUpdateConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::task::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Quality assumed when a profile has no estimate at all.
const NEUTRAL_QUALITY: f64 = 0.5;

/// Fixed partition of the [0, 1] difficulty scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    /// [0.0, 0.35)
    Simple,
    /// [0.35, 0.7)
    Medium,
    /// [0.7, 1.0]
    Complex,
}

impl ComplexityBucket {
    pub const ALL: [ComplexityBucket; 3] = [Self::Simple, Self::Medium, Self::Complex];

    pub fn from_complexity(complexity: f64) -> Self {
        if complexity < 0.35 {
            Self::Simple
        } else if complexity < 0.7 {
            Self::Medium
        } else {
            Self::Complex
        }
    }
}

impl std::fmt::Display for ComplexityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

/// Closed complexity interval a backend has been validated on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityRange {
    pub lo: f64,
    pub hi: f64,
}

impl ComplexityRange {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, complexity: f64) -> bool {
        complexity >= self.lo && complexity <= self.hi
    }
}

impl Default for ComplexityRange {
    fn default() -> Self {
        Self { lo: 0.0, hi: 1.0 }
    }
}

/// Price per token, in the caller's currency unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub prompt: f64,
    pub completion: f64,
}

/// One measured call outcome fed into [`ModelProfile::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub bucket: ComplexityBucket,
    /// Judged quality in [0, 1], when a judgment exists
    pub quality: Option<f64>,
    pub latency_ms: u64,
    pub success: bool,
}

/// Empirical performance and cost characterisation of one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub backend_id: String,
    /// Authentication domain (provider account) the backend belongs to
    pub provider: String,
    /// Model name sent on the wire; defaults to `backend_id`
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub quality_by_bucket: BTreeMap<ComplexityBucket, f64>,
    #[serde(default)]
    pub avg_response_time_ms: f64,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    pub context_window_tokens: u64,
    #[serde(default)]
    pub recommended_complexity_range: ComplexityRange,
    #[serde(default)]
    pub cost_per_token: TokenPricing,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Observations applied since the profile was registered
    #[serde(default)]
    pub sample_count: u64,
}

fn default_success_rate() -> f64 {
    1.0
}

impl ModelProfile {
    /// A profile with neutral statistics; fill in the rest with the builder methods.
    pub fn new(
        backend_id: impl Into<String>,
        provider: impl Into<String>,
        context_window_tokens: u64,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            provider: provider.into(),
            model: None,
            capabilities: BTreeSet::new(),
            quality_by_bucket: BTreeMap::new(),
            avg_response_time_ms: 0.0,
            success_rate: 1.0,
            context_window_tokens,
            recommended_complexity_range: ComplexityRange::default(),
            cost_per_token: TokenPricing::default(),
            is_free: false,
            last_updated: Utc::now(),
            sample_count: 0,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_quality(mut self, bucket: ComplexityBucket, quality: f64) -> Self {
        self.quality_by_bucket.insert(bucket, quality);
        self
    }

    /// Same quality for every bucket.
    pub fn with_uniform_quality(mut self, quality: f64) -> Self {
        for bucket in ComplexityBucket::ALL {
            self.quality_by_bucket.insert(bucket, quality);
        }
        self
    }

    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.recommended_complexity_range = ComplexityRange::new(lo, hi);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.avg_response_time_ms = latency_ms;
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate;
        self
    }

    pub fn with_pricing(mut self, prompt: f64, completion: f64) -> Self {
        self.cost_per_token = TokenPricing { prompt, completion };
        self.is_free = false;
        self
    }

    pub fn free(mut self) -> Self {
        self.is_free = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Wire model name.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.backend_id)
    }

    pub fn supports(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn in_range(&self, complexity: f64) -> bool {
        self.recommended_complexity_range.contains(complexity)
    }

    /// Quality estimate for a bucket.
    ///
    /// Unseen buckets fall back to the mean of known buckets, then to 0.5.
    pub fn predicted_quality(&self, bucket: ComplexityBucket) -> f64 {
        if let Some(q) = self.quality_by_bucket.get(&bucket) {
            return *q;
        }
        if self.quality_by_bucket.is_empty() {
            return NEUTRAL_QUALITY;
        }
        self.quality_by_bucket.values().sum::<f64>() / self.quality_by_bucket.len() as f64
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> RoutingResult<()> {
        let invalid = |reason: String| RoutingError::InvalidProfile {
            backend_id: self.backend_id.clone(),
            reason,
        };
        let range = self.recommended_complexity_range;
        if !(0.0..=1.0).contains(&range.lo) || !(0.0..=1.0).contains(&range.hi) {
            return Err(invalid(format!(
                "complexity range [{}, {}] outside [0, 1]",
                range.lo, range.hi
            )));
        }
        if range.lo > range.hi {
            return Err(invalid(format!(
                "complexity range lo {} > hi {}",
                range.lo, range.hi
            )));
        }
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(invalid(format!(
                "success rate {} outside [0, 1]",
                self.success_rate
            )));
        }
        if let Some((bucket, q)) = self
            .quality_by_bucket
            .iter()
            .find(|(_, q)| !(0.0..=1.0).contains(*q))
        {
            return Err(invalid(format!("quality {} for {} outside [0, 1]", q, bucket)));
        }
        for (name, value) in [
            ("avg_response_time_ms", self.avg_response_time_ms),
            ("prompt price", self.cost_per_token.prompt),
            ("completion price", self.cost_per_token.completion),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Fold one observation into the profile.
    ///
    /// Latency and the observed bucket's quality move by an EMA with weight
    /// `alpha`; success rate moves by `beta`. Latency is only taken from
    /// successful calls.
    pub fn apply(&mut self, observation: &Observation, params: &ProfileUpdateConfig) {
        let alpha = params.alpha;
        let beta = params.beta;

        if observation.success {
            let latency = observation.latency_ms as f64;
            self.avg_response_time_ms = if self.sample_count == 0 && self.avg_response_time_ms == 0.0
            {
                latency
            } else {
                self.avg_response_time_ms * (1.0 - alpha) + latency * alpha
            };
        }

        if let Some(quality) = observation.quality {
            let quality = quality.clamp(0.0, 1.0);
            self.quality_by_bucket
                .entry(observation.bucket)
                .and_modify(|q| *q = *q * (1.0 - alpha) + quality * alpha)
                .or_insert(quality);
        }

        let hit = if observation.success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (1.0 - beta) + hit * beta).clamp(0.0, 1.0);

        self.sample_count += 1;
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(latency_ms: u64) -> Observation {
        Observation {
            bucket: ComplexityBucket::Simple,
            quality: None,
            latency_ms,
            success: true,
        }
    }

    #[test]
    fn test_bucket_partition() {
        assert_eq!(ComplexityBucket::from_complexity(0.0), ComplexityBucket::Simple);
        assert_eq!(ComplexityBucket::from_complexity(0.35), ComplexityBucket::Medium);
        assert_eq!(ComplexityBucket::from_complexity(0.69), ComplexityBucket::Medium);
        assert_eq!(ComplexityBucket::from_complexity(1.0), ComplexityBucket::Complex);
    }

    #[test]
    fn test_latency_ema_converges_without_overshoot() {
        let mut profile = ModelProfile::new("a", "p", 8_000).with_latency_ms(5_000.0);
        profile.sample_count = 10;
        let params = ProfileUpdateConfig::default();

        let mut previous = profile.avg_response_time_ms;
        for _ in 0..5 {
            profile.apply(&success(1_000), &params);
            let current = profile.avg_response_time_ms;
            assert!(current < previous);
            assert!(current >= 1_000.0);
            // Distance to the target shrinks by (1 - alpha) each step.
            let expected = 1_000.0 + (previous - 1_000.0) * 0.8;
            assert!((current - expected).abs() < 1e-9);
            previous = current;
        }
        // 1000 + 4000 * 0.8^5
        assert!((profile.avg_response_time_ms - 2_310.72).abs() < 1e-6);
    }

    #[test]
    fn test_first_observation_seeds_latency() {
        let mut profile = ModelProfile::new("a", "p", 8_000);
        profile.apply(&success(420), &ProfileUpdateConfig::default());
        assert_eq!(profile.avg_response_time_ms, 420.0);
        assert_eq!(profile.sample_count, 1);
    }

    #[test]
    fn test_failure_moves_success_rate_not_latency() {
        let mut profile = ModelProfile::new("a", "p", 8_000).with_latency_ms(800.0);
        let obs = Observation {
            bucket: ComplexityBucket::Medium,
            quality: None,
            latency_ms: 5,
            success: false,
        };
        profile.apply(&obs, &ProfileUpdateConfig::default());
        assert_eq!(profile.avg_response_time_ms, 800.0);
        assert!((profile.success_rate - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_quality_ema_per_bucket() {
        let mut profile =
            ModelProfile::new("a", "p", 8_000).with_quality(ComplexityBucket::Complex, 0.5);
        let obs = Observation {
            bucket: ComplexityBucket::Complex,
            quality: Some(1.0),
            latency_ms: 100,
            success: true,
        };
        profile.apply(&obs, &ProfileUpdateConfig::default());
        assert!((profile.quality_by_bucket[&ComplexityBucket::Complex] - 0.6).abs() < 1e-12);
        assert!(!profile.quality_by_bucket.contains_key(&ComplexityBucket::Simple));
    }

    #[test]
    fn test_predicted_quality_fallbacks() {
        let profile = ModelProfile::new("a", "p", 8_000);
        assert_eq!(profile.predicted_quality(ComplexityBucket::Simple), 0.5);

        let profile = profile
            .with_quality(ComplexityBucket::Simple, 0.9)
            .with_quality(ComplexityBucket::Medium, 0.7);
        assert!((profile.predicted_quality(ComplexityBucket::Complex) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let profile = ModelProfile::new("a", "p", 8_000).with_range(0.8, 0.2);
        assert!(matches!(
            profile.validate(),
            Err(RoutingError::InvalidProfile { .. })
        ));
        let profile = ModelProfile::new("a", "p", 8_000).with_success_rate(1.2);
        assert!(profile.validate().is_err());
        assert!(ModelProfile::new("a", "p", 8_000).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite_stats() {
        for latency in [f64::NAN, f64::INFINITY, -1.0] {
            let profile = ModelProfile::new("a", "p", 8_000).with_latency_ms(latency);
            assert!(
                matches!(profile.validate(), Err(RoutingError::InvalidProfile { .. })),
                "latency {} should be rejected",
                latency
            );
        }
        let profile = ModelProfile::new("a", "p", 8_000).with_pricing(f64::INFINITY, 0.0);
        assert!(profile.validate().is_err());
        let profile = ModelProfile::new("a", "p", 8_000).with_pricing(0.0, f64::NAN);
        assert!(profile.validate().is_err());
    }
}
