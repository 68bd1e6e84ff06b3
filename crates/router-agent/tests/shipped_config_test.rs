//! The profiles and task files shipped in `config/` must stay loadable.

use router_agent::{build_executor, load_task_file, simulated_adapter, ProfilesFile};
use routing::{RankConstraints, Task};
use std::path::PathBuf;
use std::sync::Arc;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[test]
fn test_shipped_profiles_parse_and_validate() {
    let file = ProfilesFile::load(&config_dir().join("profiles.toml")).unwrap();
    let routing = file.routing.expect("shipped file carries a routing table");
    routing.validate().unwrap();
    assert_eq!(file.profiles.len(), 3);
    for profile in &file.profiles {
        profile.validate().unwrap();
    }
}

#[test]
fn test_shipped_task_file_loads() {
    let tasks = load_task_file(&config_dir().join("bench_tasks.txt")).unwrap();
    assert_eq!(tasks.len(), 5);
    assert_eq!(tasks[0].id.as_str(), "bench_tasks-2");
}

#[tokio::test(start_paused = true)]
async fn test_shipped_profiles_route_simple_prompt_locally() {
    let file = ProfilesFile::load(&config_dir().join("profiles.toml")).unwrap();
    let routing = file.routing.unwrap_or_default();
    let adapter = Arc::new(simulated_adapter(&file.profiles));
    let executor = build_executor(&routing, file.profiles, adapter).unwrap();

    let task = Task::new("Translate hello into French");
    let ranking = executor
        .coordinator()
        .engine()
        .rank(&task, &RankConstraints::for_task(&task));
    assert_eq!(ranking.top().unwrap().backend_id, "local-small");

    let outcome = executor.submit(task).outcome().await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.attempted_backends(), vec!["local-small"]);
}
