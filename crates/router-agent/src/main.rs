use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use router_agent::{
    build_executor, load_task_file, simulated_adapter, AgentConfig, HttpAdapter,
};
use routing::{
    summarize, BenchmarkHarness, BenchmarkStore, ExecutionAdapter, RankConstraints, Task,
    TaskExecutor,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Profiles TOML file (overrides ROUTER_PROFILES)
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    /// Answer from the in-process simulated adapter instead of the HTTP endpoint
    #[arg(long, global = true, default_value_t = false)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the ranked candidates for a prompt
    Rank {
        description: String,
        /// Reject candidates whose estimated cost exceeds this
        #[arg(long)]
        max_cost: Option<f64>,
        /// Relative deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Route a prompt and execute it with fallback
    Run {
        description: String,
        #[arg(long)]
        max_cost: Option<f64>,
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Benchmark backends over a newline-delimited task file
    Bench {
        #[arg(long)]
        tasks: PathBuf,
        /// Backend to include (repeatable; default: every profile)
        #[arg(long = "backend")]
        backends: Vec<String>,
    },
    /// Summarize the stored benchmark results
    Summary,
}

fn build_task(description: String, max_cost: Option<f64>, deadline_ms: Option<u64>) -> Task {
    let mut task = Task::new(description);
    if let Some(limit) = max_cost {
        task = task.with_max_cost(limit);
    }
    if let Some(ms) = deadline_ms {
        task = task.with_deadline(Duration::from_millis(ms));
    }
    task
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn executor(config: &mut AgentConfig, simulate: bool) -> Result<TaskExecutor> {
    let profiles = config.load_profiles()?;
    info!(
        profiles = profiles.len(),
        path = %config.profiles_path.display(),
        simulate,
        "Profiles loaded"
    );
    let adapter: Arc<dyn ExecutionAdapter> = if simulate {
        Arc::new(simulated_adapter(&profiles))
    } else {
        Arc::new(HttpAdapter::new(config.endpoint.clone(), &profiles)?)
    };
    build_executor(&config.routing, profiles, adapter)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = AgentConfig::default();
    if let Some(path) = args.profiles {
        config.profiles_path = path;
    }

    match args.command {
        Command::Rank {
            description,
            max_cost,
            deadline_ms,
        } => {
            let executor = executor(&mut config, args.simulate)?;
            let task = build_task(description, max_cost, deadline_ms);
            let ranking = executor
                .coordinator()
                .engine()
                .rank(&task, &RankConstraints::for_task(&task));
            print_json(&ranking)?;
        }
        Command::Run {
            description,
            max_cost,
            deadline_ms,
        } => {
            let executor = executor(&mut config, args.simulate)?;
            let task = build_task(description, max_cost, deadline_ms);
            let outcome = executor.submit(task).outcome().await?;
            print_json(&outcome)?;
            if !outcome.is_success() {
                bail!("Task {} failed", outcome.task_id());
            }
        }
        Command::Bench { tasks, backends } => {
            let executor = executor(&mut config, args.simulate)?;
            let sample_tasks = load_task_file(&tasks)?;
            let backend_ids = if backends.is_empty() {
                executor
                    .coordinator()
                    .engine()
                    .store()
                    .snapshot()
                    .into_iter()
                    .map(|p| p.backend_id)
                    .collect()
            } else {
                backends
            };

            let harness = BenchmarkHarness::from_config(&executor, &config.routing.benchmark);
            let results = harness.run(&backend_ids, &sample_tasks).await?;
            let summaries = harness.finish(&results);
            info!(
                results = results.len(),
                dir = %config.routing.benchmark.results_dir.display(),
                "Benchmark complete"
            );
            print_json(&summaries)?;
        }
        Command::Summary => {
            let store = BenchmarkStore::new(config.routing.benchmark.results_dir.clone());
            let results = store.load_results().with_context(|| {
                format!("Failed to load results from {}", store.dir().display())
            })?;
            info!(results = results.len(), "Results loaded");
            let summaries = summarize(&results);
            for summary in &summaries {
                info!("{}", summary);
            }
            print_json(&summaries)?;
        }
    }

    Ok(())
}
