//! Integration tests for durable benchmark records
//!
//! Exercises the save/load cycle and a harness run persisting into a
//! scratch results directory.

use chrono::{TimeZone, Utc};
use routing::{
    summarize, BenchmarkConfig, BenchmarkHarness, BenchmarkResult, BenchmarkStore, CostEstimator,
    DecisionEngine, ErrorKind, ExecutionAdapter, ExecutorConfig, FallbackCoordinator,
    FallbackPolicy, ModelProfile, ProfileStore, ProfileUpdateConfig, ScoringWeights,
    SimulatedAdapter, Task, TaskClassifier, TaskExecutor, TaskId,
};
use std::sync::Arc;
use std::time::Duration;

fn sample_result() -> BenchmarkResult {
    BenchmarkResult {
        task_id: TaskId::from("bench-7"),
        backend_id: "local-llama".into(),
        success: true,
        latency_ms: 1_834,
        prompt_tokens: 213,
        completion_tokens: 97,
        error_kind: None,
        timestamp: Utc.with_ymd_and_hms(2024, 11, 3, 8, 15, 0).unwrap()
            + chrono::Duration::milliseconds(123),
        quality_score: Some(0.62),
    }
}

/// Test: a saved result loads back equal in every field
#[test]
fn test_result_round_trip() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = BenchmarkStore::new(dir.path());
    let original = sample_result();

    let path = store.save_result(&original).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(!name.contains(':'));
    assert!(name.starts_with("bench-7_local-llama_"));

    let loaded = store.load_results().unwrap();
    assert_eq!(loaded, vec![original]);
}

/// Test: the on-disk record uses the documented keys
#[test]
fn test_record_keys_on_disk() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = BenchmarkStore::new(dir.path());
    let failed = BenchmarkResult {
        success: false,
        error_kind: Some(ErrorKind::Timeout),
        quality_score: None,
        ..sample_result()
    };
    let path = store.save_result(&failed).unwrap();

    let raw = std::fs::read_to_string(path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    for key in [
        "taskId",
        "backendId",
        "success",
        "latencyMs",
        "promptTokens",
        "completionTokens",
        "errorKind",
        "timestamp",
    ] {
        assert!(value.get(key).is_some(), "missing key {}", key);
    }
    assert_eq!(value["errorKind"], "timeout");
    assert!(value.get("qualityScore").is_none());
}

/// Test: persistence failure never fails the benchmark run
#[tokio::test(start_paused = true)]
async fn test_unwritable_results_dir_is_best_effort() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    // A regular file where the results directory should be.
    let blocked = dir.path().join("results");
    std::fs::write(&blocked, "not a directory").unwrap();

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
        Arc::new(SimulatedAdapter::new().with_backend("local", Duration::from_millis(40)));
    let coordinator = Arc::new(FallbackCoordinator::new(
        engine,
        adapter,
        FallbackPolicy::default(),
    ));
    let live = TaskExecutor::new(coordinator, ExecutorConfig::default());

    let harness = BenchmarkHarness::from_config(
        &live,
        &BenchmarkConfig {
            results_dir: blocked,
            max_concurrent: Some(2),
            summary_prefix: None,
        },
    );
    let tasks: Vec<Task> = (0..3)
        .map(|i| Task::new(format!("sample {}", i)))
        .collect();
    let results = harness.run(&["local".to_string()], &tasks).await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    let summaries = harness.finish(&results);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].sample_count, 3);
    assert_eq!(summaries[0].success_rate, 1.0);
}

/// Test: summaries loaded from disk match what summarize produced
#[test]
fn test_summary_round_trip() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = BenchmarkStore::new(dir.path());
    let summaries = summarize(&[sample_result()]);
    for summary in &summaries {
        store.save_summary(summary, None).unwrap();
    }
    assert_eq!(store.load_summaries().unwrap(), summaries);
    assert!(store.load_results().unwrap().is_empty());
}
