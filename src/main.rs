use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use tiny_agent_graph::config::RunnerConfig;
use tiny_agent_graph::context::Context;
use tiny_agent_graph::dag_validator::DagValidator;
use tiny_agent_graph::plugin_registry::PluginRegistry;
use tiny_agent_graph::plugins::builtin;
use tiny_agent_graph::scheduler::{Scheduler, SchedulerOutcome};
use tiny_agent_graph::step_config::load_pipeline;

/// Loads every YAML pipeline definition sitting next to `pipeline` (its
/// own directory) and registers each under `pipeline.<id>`, so a step
/// in one can reference a sibling as a nested pipeline.
fn register_sibling_pipelines(registry: &mut PluginRegistry, pipeline: &std::path::Path) {
    let Some(dir) = pipeline.parent() else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }
        match load_pipeline(&path) {
            Ok(definition) => registry.register_pipeline(definition),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unparseable sibling pipeline file");
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "tag", version, about = "Durable DAG execution engine for typed plugin workflows")]
struct Cli {
    /// Optional path to a RunnerConfig YAML file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline definition without running it.
    Validate {
        /// Path to the pipeline YAML file.
        pipeline: PathBuf,
    },
    /// Run a pipeline definition to completion or suspension.
    Run {
        /// Path to the pipeline YAML file.
        pipeline: PathBuf,
        /// Task id to run under; generated if omitted.
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Resume a previously suspended task.
    Resume {
        /// Path to the pipeline YAML file (must match the original run).
        pipeline: PathBuf,
        /// Task id to resume.
        task_id: String,
        /// Specific checkpoint id; the most recent one is used if omitted.
        #[arg(long)]
        checkpoint_id: Option<String>,
    },
}

fn registry(pipeline: &std::path::Path) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    builtin::register_all(&mut registry);
    register_sibling_pipelines(&mut registry, pipeline);
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RunnerConfig::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { pipeline } => {
            let definition = load_pipeline(&pipeline)?;
            let registry = registry(&pipeline);
            match DagValidator::validate(&definition.steps, &registry) {
                Ok(_) => {
                    println!("pipeline '{}' is valid ({} steps)", definition.id, definition.steps.len());
                }
                Err(e) => {
                    error!(error = %e, "pipeline failed validation");
                    std::process::exit(1);
                }
            }
        }
        Commands::Run { pipeline, task_id } => {
            let definition = load_pipeline(&pipeline)?;
            let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            info!(task_id, pipeline = %definition.id, "starting run");

            let scheduler = Scheduler::new(Arc::new(registry(&pipeline)), config.max_workers)
                .with_checkpoint_manager(config.checkpoint_manager())
                .with_task_history(Arc::new(config.task_history()))
                .with_artifact_store(Arc::new(config.artifact_store()));
            let context = Context::new(task_id.clone(), Some(definition.id.clone()));

            match scheduler.execute(&context, &definition.steps, None).await {
                Ok(state) => {
                    println!("task '{task_id}' completed");
                    println!("  completed: {:?}", state.completed_steps());
                }
                Err(SchedulerOutcome::Suspended(s)) => {
                    println!("task '{task_id}' suspended at {:?}", s.suspended_steps);
                    println!("  checkpoint: {}", s.checkpoint_id);
                }
                Err(SchedulerOutcome::Failed(e)) => {
                    error!(error = %e, "run failed");
                    std::process::exit(1);
                }
                Err(SchedulerOutcome::Validation(e)) => {
                    error!(error = %e, "pipeline failed validation");
                    std::process::exit(1);
                }
                Err(SchedulerOutcome::Checkpoint(e)) => {
                    error!(error = %e, "checkpoint error");
                    std::process::exit(1);
                }
            }
        }
        Commands::Resume {
            pipeline,
            task_id,
            checkpoint_id,
        } => {
            let definition = load_pipeline(&pipeline)?;
            let scheduler = Scheduler::new(Arc::new(registry(&pipeline)), config.max_workers)
                .with_checkpoint_manager(config.checkpoint_manager())
                .with_task_history(Arc::new(config.task_history()))
                .with_artifact_store(Arc::new(config.artifact_store()));

            match scheduler
                .resume_from_checkpoint(
                    &task_id,
                    checkpoint_id.as_deref(),
                    &definition.steps,
                    BTreeMap::new(),
                )
                .await
            {
                Ok(state) => {
                    println!("task '{task_id}' resumed and completed");
                    println!("  completed: {:?}", state.completed_steps());
                }
                Err(SchedulerOutcome::Suspended(s)) => {
                    println!("task '{task_id}' suspended again at {:?}", s.suspended_steps);
                    println!("  checkpoint: {}", s.checkpoint_id);
                }
                Err(SchedulerOutcome::Failed(e)) => {
                    error!(error = %e, "resumed run failed");
                    std::process::exit(1);
                }
                Err(SchedulerOutcome::Validation(e)) => {
                    error!(error = %e, "pipeline failed validation");
                    std::process::exit(1);
                }
                Err(SchedulerOutcome::Checkpoint(e)) => {
                    error!(error = %e, "checkpoint error");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
