//! Benchmark record types
//!
//! Both records serialize with camelCase keys; the on-disk format is shared
//! with tooling outside this crate.

use crate::error::ErrorKind;
use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of running one sample task against one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub task_id: TaskId,
    pub backend_id: String,
    pub success: bool,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
    /// Held-out judgment in [0, 1], present only when a judge scored the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// Per-backend aggregate over a batch of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSummary {
    pub backend_id: String,
    pub sample_count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub avg_quality_estimate: f64,
    pub generated_at: DateTime<Utc>,
}

impl std::fmt::Display for BenchmarkSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} samples, {:.1}% success, {:.0}ms avg, quality {:.2}",
            self.backend_id,
            self.sample_count,
            self.success_rate * 100.0,
            self.avg_latency_ms,
            self.avg_quality_estimate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_uses_camel_case_keys() {
        let result = BenchmarkResult {
            task_id: TaskId::from("t-1"),
            backend_id: "local".into(),
            success: false,
            latency_ms: 1_200,
            prompt_tokens: 40,
            completion_tokens: 0,
            error_kind: Some(ErrorKind::RateLimited),
            timestamp: Utc::now(),
            quality_score: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["taskId"], "t-1");
        assert_eq!(value["backendId"], "local");
        assert_eq!(value["latencyMs"], 1_200);
        assert_eq!(value["errorKind"], "rate_limited");
        assert!(value.get("qualityScore").is_none());
    }

    #[test]
    fn test_summary_display() {
        let summary = BenchmarkSummary {
            backend_id: "local".into(),
            sample_count: 4,
            success_rate: 0.75,
            avg_latency_ms: 812.4,
            avg_quality_estimate: 0.8,
            generated_at: Utc::now(),
        };
        assert_eq!(
            summary.to_string(),
            "local: 4 samples, 75.0% success, 812ms avg, quality 0.80"
        );
    }
}
