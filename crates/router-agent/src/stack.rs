//! Wires the routing core together for the CLI.

use anyhow::{Context, Result};
use routing::{
    CostEstimator, DecisionEngine, ExecutionAdapter, FallbackCoordinator, ModelProfile,
    ProfileStore, RoutingConfig, SimulatedAdapter, Task, TaskClassifier, TaskExecutor,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Latency used for simulated backends whose profile has no average yet.
const DEFAULT_SIMULATED_LATENCY_MS: f64 = 250.0;

/// Build a live executor over `profiles` and `adapter`.
pub fn build_executor(
    routing: &RoutingConfig,
    profiles: Vec<ModelProfile>,
    adapter: Arc<dyn ExecutionAdapter>,
) -> Result<TaskExecutor> {
    let store = ProfileStore::with_profiles(routing.profile_update, profiles)
        .context("Failed to register profiles")?
        .shared();
    let engine = Arc::new(DecisionEngine::new(
        store,
        TaskClassifier::new(routing.classifier),
        CostEstimator::new(routing.cost),
        routing.scoring,
    ));
    let coordinator = Arc::new(FallbackCoordinator::new(engine, adapter, routing.fallback));
    Ok(TaskExecutor::new(coordinator, routing.executor))
}

/// Offline adapter answering for every profile at its average latency.
pub fn simulated_adapter(profiles: &[ModelProfile]) -> SimulatedAdapter {
    profiles.iter().fold(SimulatedAdapter::new(), |adapter, profile| {
        let default_latency = Duration::from_secs_f64(DEFAULT_SIMULATED_LATENCY_MS / 1_000.0);
        let latency = if profile.avg_response_time_ms > 0.0 {
            Duration::try_from_secs_f64(profile.avg_response_time_ms / 1_000.0)
                .unwrap_or(default_latency)
        } else {
            default_latency
        };
        adapter.with_backend(&profile.backend_id, latency)
    })
}

/// Parse a newline-delimited task file. Blank lines and `#` comments are skipped;
/// ids are `{stem}-{line}` so reruns of the same file are comparable.
pub fn parse_task_file(stem: &str, raw: &str) -> Vec<Task> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(i, line)| Task::new(line.trim()).with_id(format!("{}-{}", stem, i + 1)))
        .collect()
}

pub fn load_task_file(path: &Path) -> Result<Vec<Task>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("task");
    Ok(parse_task_file(stem, &raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::TaskOutcome;

    #[test]
    fn test_parse_task_file_skips_comments() {
        let tasks = parse_task_file("smoke", "# header\nSay hi\n\n  Sort a list  \n");
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["smoke-2", "smoke-4"]);
        assert_eq!(tasks[1].description, "Sort a list");
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_stack_runs_task() {
        let profiles = vec![
            ModelProfile::new("local", "ollama", 8_192)
                .with_latency_ms(400.0)
                .free(),
            ModelProfile::new("cloud", "acme", 128_000).with_pricing(0.000001, 0.000002),
        ];
        let adapter = Arc::new(simulated_adapter(&profiles));
        let executor = build_executor(&RoutingConfig::default(), profiles, adapter).unwrap();

        let outcome = executor
            .submit(Task::new("hello"))
            .outcome()
            .await
            .unwrap();
        assert!(matches!(outcome, TaskOutcome::Succeeded { .. }));
    }

    #[test]
    fn test_non_finite_profile_rejected_without_panic() {
        let raw = r#"
[[profiles]]
backend_id = "bad"
provider = "p"
context_window_tokens = 8192
avg_response_time_ms = inf
"#;
        let profiles = crate::config::ProfilesFile::parse(raw).unwrap().profiles;
        let adapter = Arc::new(simulated_adapter(&profiles));
        assert!(build_executor(&RoutingConfig::default(), profiles, adapter).is_err());
    }

    #[test]
    fn test_duplicate_profiles_rejected() {
        let profiles = vec![
            ModelProfile::new("x", "p", 1_024),
            ModelProfile::new("x", "p", 1_024),
        ];
        let adapter = Arc::new(SimulatedAdapter::new());
        assert!(build_executor(&RoutingConfig::default(), profiles, adapter).is_err());
    }
}
