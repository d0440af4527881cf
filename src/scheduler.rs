//! The central orchestrator: concurrency-bounded task launcher running
//! the normal phase then the finally phase, with progress emission and
//! suspension/checkpoint handling.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::artifacts::commands::ArtifactContent;
use crate::artifacts::store::ArtifactStore;
use crate::checkpoint::CheckpointManager;
use crate::connections::{self, ConnectionMap};
use crate::context::Context;
use crate::dag_state::{DagState, StepStatus};
use crate::dag_validator::{DagValidator, ParsedDependencies};
use crate::errors::{
    CheckpointError, DagExecutionError, PipelineExecutionError, PipelineSuspended, StepFailure,
    SuspendInfo,
};
use crate::input_resolver::InputResolver;
use crate::loop_strategy::{LoopOutcome, LoopStrategy};
use crate::output_handler::OutputHandler;
use crate::plugin::{PluginInvoker, PluginOutcome, RetryPolicy};
use crate::plugin_registry::PluginRegistry;
use crate::step_config::StepConfig;
use crate::task_history::{StepProgressRecord, TaskHistory, TaskRecord};

/// One status-transition event, emitted to the progress callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_name: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub start_time: Option<chrono::DateTime<Utc>>,
    pub end_time: Option<chrono::DateTime<Utc>>,
    pub step_number: usize,
    pub total_steps: usize,
    pub group_name: String,
    pub task_id: String,
}

pub type ProgressCallback = Arc<dyn Fn(StepProgress) + Send + Sync>;

/// What one task's invocation resolved to, before the scheduler updates
/// `DagState`.
enum TaskOutcome {
    Completed { artifacts: Vec<String> },
    Failed(StepFailure),
    Suspended(SuspendInfo),
}

#[derive(Clone)]
pub struct Scheduler {
    pub registry: Arc<PluginRegistry>,
    pub max_workers: usize,
    pub checkpoint_manager: Option<Arc<CheckpointManager>>,
    pub task_history: Option<Arc<TaskHistory>>,
    pub artifact_store: Option<Arc<ArtifactStore>>,
    pub progress_callback: Option<ProgressCallback>,
    pub retry_policy: RetryPolicy,
}

impl Scheduler {
    pub fn new(registry: Arc<PluginRegistry>, max_workers: usize) -> Self {
        Self {
            registry,
            max_workers: max_workers.max(1),
            checkpoint_manager: None,
            task_history: None,
            artifact_store: None,
            progress_callback: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_checkpoint_manager(mut self, manager: Arc<CheckpointManager>) -> Self {
        self.checkpoint_manager = Some(manager);
        self
    }

    /// Wires a `TaskHistory` ledger: `execute` upserts this task's
    /// status and per-step progress into it on every terminal outcome.
    pub fn with_task_history(mut self, history: Arc<TaskHistory>) -> Self {
        self.task_history = Some(history);
        self
    }

    /// Wires an `ArtifactStore`: a successful leaf-plugin step's output
    /// is durably saved as a JSON artifact alongside the run.
    pub fn with_artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn set_progress_callback(&mut self, cb: ProgressCallback) {
        self.progress_callback = Some(cb);
    }

    /// Upserts this task's status and per-step progress into the wired
    /// `TaskHistory`, if any. Best-effort: a ledger write failure is
    /// logged, not propagated, matching the checkpoint write's handling
    /// of its own I/O failures.
    async fn sync_task_history(
        &self,
        context: &Context,
        by_name: &HashMap<&str, &StepConfig>,
        state: &DagState,
        status: &str,
    ) {
        let Some(history) = &self.task_history else {
            return;
        };

        let mut step_progress = BTreeMap::new();
        for (name, s) in &state.step_states {
            let plugin = by_name.get(name.as_str()).map(|c| c.plugin.clone()).unwrap_or_default();
            step_progress.insert(
                name.clone(),
                StepProgressRecord {
                    status: format!("{:?}", s.status).to_lowercase(),
                    start_time: s.start_time,
                    end_time: s.end_time,
                    error: s.error.clone(),
                    plugin,
                    artifacts: s.saved_artifacts.clone(),
                },
            );
        }

        let task_id = context.task_id.clone();
        let pipeline_id = context.pipeline_id.clone().unwrap_or_default();
        let status = status.to_string();
        let now = Utc::now();

        let result = history
            .update(move |records| {
                let entry = records.entry(task_id.clone()).or_insert_with(|| TaskRecord {
                    pipeline_id: pipeline_id.clone(),
                    params: BTreeMap::new(),
                    created_at: now,
                    updated_at: now,
                    status: status.clone(),
                    artifacts: BTreeMap::new(),
                    step_progress: BTreeMap::new(),
                });
                entry.pipeline_id = pipeline_id.clone();
                entry.status = status.clone();
                entry.updated_at = now;
                entry.step_progress = step_progress.clone();
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to update task history");
        }
    }

    fn emit_progress(
        &self,
        step_name: &str,
        state: &DagState,
        total_steps: usize,
        task_id: &str,
        group_name: &str,
    ) {
        let Some(cb) = &self.progress_callback else {
            return;
        };
        let Some(s) = state.step_states.get(step_name) else {
            return;
        };
        cb(StepProgress {
            step_name: step_name.to_string(),
            status: s.status,
            error: s.error.clone(),
            start_time: s.start_time,
            end_time: s.end_time,
            step_number: state.step_number(step_name),
            total_steps,
            group_name: group_name.to_string(),
            task_id: task_id.to_string(),
        });
    }

    /// Runs `steps` against `context` to completion (or suspension).
    ///
    /// Normalizes and validates the definition, reconciles or creates
    /// `DagState`, resolves connections, runs the normal phase, then
    /// always runs the finally phase, and finally aggregates errors.
    pub async fn execute(
        &self,
        context: &Context,
        steps: &[StepConfig],
        existing_state: Option<DagState>,
    ) -> Result<DagState, SchedulerOutcome> {
        let parsed =
            DagValidator::validate(steps, &self.registry).map_err(SchedulerOutcome::Validation)?;

        let step_names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
        let mut state = match existing_state {
            Some(mut s) => {
                s.reconcile_with_definition(&step_names);
                s
            }
            None => DagState::new(&step_names),
        };
        state.start_time = Some(Utc::now());

        let connections = connections::resolve_connections(steps);
        let group_names = identify_parallel_groups(steps, &parsed);

        let by_name: HashMap<&str, &StepConfig> =
            steps.iter().map(|s| (s.name.as_str(), s)).collect();
        let finally_steps: BTreeSet<String> = steps
            .iter()
            .filter(|s| s.is_finally)
            .map(|s| s.name.clone())
            .collect();

        let critical_failure = self
            .run_normal_phase(context, &by_name, &parsed, &connections, &group_names, &mut state)
            .await;

        let finally_errors = self
            .run_finally_phase(context, &by_name, &parsed, &connections, &group_names, &finally_steps, &mut state)
            .await;

        state.end_time = Some(Utc::now());

        let suspended_steps: Vec<String> = state.suspended_steps().into_iter().collect();
        if !suspended_steps.is_empty() {
            let checkpoint_id = match &self.checkpoint_manager {
                Some(manager) => match manager
                    .create_checkpoint(
                        &context.task_id,
                        context.pipeline_id.clone(),
                        &state,
                        context.snapshot(),
                        suspended_steps.clone(),
                        BTreeMap::new(),
                        BTreeMap::new(),
                    )
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        error!(error = %e, "failed to write suspension checkpoint");
                        String::new()
                    }
                },
                None => {
                    warn!("run suspended but no checkpoint manager configured; nothing durable was written");
                    String::new()
                }
            };
            self.sync_task_history(context, &by_name, &state, "suspended").await;
            return Err(SchedulerOutcome::Suspended(PipelineSuspended {
                suspended_steps,
                checkpoint_id,
            }));
        }

        let aggregate = PipelineExecutionError {
            normal_phase_error: critical_failure.map(Box::new),
            finally_phase_errors: finally_errors,
        };
        if !aggregate.is_empty() {
            let status = if aggregate.normal_phase_error.is_some() {
                "failed"
            } else {
                "completed_with_errors"
            };
            self.sync_task_history(context, &by_name, &state, status).await;
            return Err(SchedulerOutcome::Failed(aggregate));
        }

        self.sync_task_history(context, &by_name, &state, "completed").await;
        Ok(state)
    }

    async fn run_normal_phase(
        &self,
        context: &Context,
        by_name: &HashMap<&str, &StepConfig>,
        parsed: &ParsedDependencies,
        connections: &ConnectionMap,
        group_names: &HashMap<String, String>,
        state: &mut DagState,
    ) -> Option<DagExecutionError> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut in_flight: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let mut aborted = false;
        let mut critical_failure = None;

        let total_steps = by_name.len();
        let task_id = context.task_id.clone();

        loop {
            if !aborted {
                let non_finally: Vec<&str> = by_name
                    .values()
                    .filter(|s| !s.is_finally)
                    .map(|s| s.name.as_str())
                    .collect();

                for name in &non_finally {
                    let deps = parsed.get(*name).map(Vec::as_slice).unwrap_or(&[]);
                    if state.should_skip(name, deps, context) {
                        state.mark_skipped(name);
                        self.emit_progress(name, state, total_steps, &task_id, "sequential");
                    }
                }

                let mut ready: Vec<&str> = non_finally
                    .iter()
                    .filter(|name| {
                        let deps = parsed.get(**name).map(Vec::as_slice).unwrap_or(&[]);
                        state.is_ready(name, deps, context)
                    })
                    .copied()
                    .collect();
                ready.sort_by_key(|n| state.step_number(n));

                for name in ready {
                    let step = by_name[name];
                    state.mark_running(name);
                    self.emit_progress(
                        name,
                        state,
                        total_steps,
                        &task_id,
                        group_names.get(name).map(String::as_str).unwrap_or("sequential"),
                    );

                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                    let step = step.clone();
                    let deps_for_step = parsed.get(name).cloned().unwrap_or_default();
                    let ctx = context.clone();
                    let registry = self.registry.clone();
                    let connections = connections.clone();
                    let retry_policy = self.retry_policy;
                    let checkpoint_manager = self.checkpoint_manager.clone();
                    let artifact_store = self.artifact_store.clone();
                    let progress_callback = self.progress_callback.clone();
                    let max_workers = self.max_workers;

                    in_flight.spawn(async move {
                        let _permit = permit;
                        let outcome = run_one_step(
                            &step,
                            &deps_for_step,
                            &connections,
                            &ctx,
                            &registry,
                            retry_policy,
                            max_workers,
                            checkpoint_manager,
                            artifact_store,
                            progress_callback,
                        )
                        .await;
                        (step.name.clone(), outcome)
                    });
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (name, outcome) = joined.expect("step task panicked");

            match outcome {
                TaskOutcome::Completed { artifacts } => {
                    state.mark_completed(&name, artifacts);
                    self.emit_progress(&name, state, total_steps, &task_id, "sequential");
                }
                TaskOutcome::Failed(failure) => {
                    state.mark_failed(&name, &failure);
                    self.emit_progress(&name, state, total_steps, &task_id, "sequential");
                    let step_is_critical =
                        by_name.get(name.as_str()).map(|s| s.fail_on_error).unwrap_or(true);
                    if step_is_critical {
                        aborted = true;
                        critical_failure.get_or_insert(DagExecutionError {
                            step: name.clone(),
                            source: failure,
                        });
                    }
                }
                TaskOutcome::Suspended(_info) => {
                    state.mark_suspended(&name);
                    self.emit_progress(&name, state, total_steps, &task_id, "sequential");
                }
            }
        }

        critical_failure
    }

    async fn run_finally_phase(
        &self,
        context: &Context,
        by_name: &HashMap<&str, &StepConfig>,
        parsed: &ParsedDependencies,
        connections: &ConnectionMap,
        group_names: &HashMap<String, String>,
        finally_steps: &BTreeSet<String>,
        state: &mut DagState,
    ) -> Vec<(String, StepFailure)> {
        let mut errors = Vec::new();
        if finally_steps.is_empty() {
            return errors;
        }
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut in_flight: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let total_steps = by_name.len();
        let task_id = context.task_id.clone();

        loop {
            let mut ready: Vec<&str> = finally_steps
                .iter()
                .map(String::as_str)
                .filter(|name| {
                    let deps = parsed.get(*name).map(Vec::as_slice).unwrap_or(&[]);
                    state.is_ready_for_finally(name, deps)
                })
                .collect();
            ready.sort_by_key(|n| state.step_number(n));

            for name in ready {
                let step = by_name[name];
                state.mark_running(name);
                self.emit_progress(
                    name,
                    state,
                    total_steps,
                    &task_id,
                    group_names.get(name).map(String::as_str).unwrap_or("sequential"),
                );

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                let step = step.clone();
                let deps_for_step = parsed.get(name).cloned().unwrap_or_default();
                let ctx = context.clone();
                let registry = self.registry.clone();
                let connections = connections.clone();
                let retry_policy = self.retry_policy;
                let checkpoint_manager = self.checkpoint_manager.clone();
                let artifact_store = self.artifact_store.clone();
                let progress_callback = self.progress_callback.clone();
                let max_workers = self.max_workers;

                in_flight.spawn(async move {
                    let _permit = permit;
                    let outcome = run_one_step(
                        &step,
                        &deps_for_step,
                        &connections,
                        &ctx,
                        &registry,
                        retry_policy,
                        max_workers,
                        checkpoint_manager,
                        artifact_store,
                        progress_callback,
                    )
                    .await;
                    (step.name.clone(), outcome)
                });
            }

            if in_flight.is_empty() {
                let remaining: Vec<&String> = finally_steps
                    .iter()
                    .filter(|n| state.status_of(n) == Some(StepStatus::Pending))
                    .collect();
                if !remaining.is_empty() {
                    warn!(?remaining, "finally phase stalled with unready steps");
                }
                break;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (name, outcome) = joined.expect("finally step task panicked");
            match outcome {
                TaskOutcome::Completed { artifacts } => {
                    state.mark_completed(&name, artifacts);
                }
                TaskOutcome::Failed(failure) => {
                    state.mark_failed(&name, &failure);
                    errors.push((name.clone(), failure));
                }
                TaskOutcome::Suspended(_) => {
                    // A finally step has nowhere left to resume into;
                    // treat suspension here as a hard failure.
                    let failure = StepFailure::Other("suspended during finally phase".into());
                    state.mark_failed(&name, &failure);
                    errors.push((name.clone(), failure));
                }
            }
            self.emit_progress(&name, state, total_steps, &task_id, "sequential");
        }

        errors
    }

    /// Resumes a suspended task from its most recent (or a specific)
    /// checkpoint, re-entering suspended steps.
    pub async fn resume_from_checkpoint(
        &self,
        task_id: &str,
        checkpoint_id: Option<&str>,
        steps: &[StepConfig],
        resume_data: BTreeMap<String, Value>,
    ) -> Result<DagState, SchedulerOutcome> {
        let manager = self.checkpoint_manager.clone().ok_or_else(|| {
            SchedulerOutcome::Checkpoint(CheckpointError::NotFound(task_id.to_string()))
        })?;

        manager
            .cleanup_stale_locks(task_id)
            .await
            .map_err(SchedulerOutcome::Checkpoint)?;
        manager
            .start_resume(task_id)
            .await
            .map_err(SchedulerOutcome::Checkpoint)?;

        let result = self
            .resume_inner(&manager, task_id, checkpoint_id, steps, resume_data)
            .await;

        manager.complete_resume(task_id).await.ok();
        result
    }

    async fn resume_inner(
        &self,
        manager: &CheckpointManager,
        task_id: &str,
        checkpoint_id: Option<&str>,
        steps: &[StepConfig],
        resume_data: BTreeMap<String, Value>,
    ) -> Result<DagState, SchedulerOutcome> {
        let checkpoint = manager
            .load_checkpoint(task_id, checkpoint_id)
            .await
            .map_err(SchedulerOutcome::Checkpoint)?;

        let step_names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
        let mut state = CheckpointManager::restore_dag_state(&checkpoint, &step_names)
            .map_err(SchedulerOutcome::Checkpoint)?;

        let context = Context::new(task_id, checkpoint.pipeline_id.clone());
        CheckpointManager::restore_context(&checkpoint, &context);
        context.set_resume_data(resume_data.clone());

        for step_name in &checkpoint.suspended_at_steps {
            match resume_data.get(step_name) {
                Some(Value::Object(map))
                    if map.get("complete").and_then(Value::as_bool).unwrap_or(false) =>
                {
                    let output = map.get("collected_data").cloned().unwrap_or(Value::Null);
                    context.set(step_name, output);
                    state.mark_completed_from_suspension(step_name);
                    info!(step = step_name, "resumed step completed directly from resume data");
                }
                _ => {
                    state.reset_for_resume(step_name);
                    info!(step = step_name, "resumed step re-entering normal scheduling");
                }
            }
        }

        self.execute(&context, steps, Some(state)).await
    }
}

/// Terminal outcomes of [`Scheduler::execute`].
pub enum SchedulerOutcome {
    Validation(crate::errors::ValidationError),
    Failed(PipelineExecutionError),
    Suspended(PipelineSuspended),
    Checkpoint(CheckpointError),
}

/// Dispatches one step: loop steps go through `LoopStrategy`, regular
/// steps through InputResolver -> PluginInvoker -> OutputHandler.
#[allow(clippy::too_many_arguments)]
async fn run_one_step(
    step: &StepConfig,
    deps: &[crate::dag_validator::ParsedDependency],
    connections: &ConnectionMap,
    context: &Context,
    registry: &Arc<PluginRegistry>,
    retry_policy: RetryPolicy,
    max_workers: usize,
    checkpoint_manager: Option<Arc<CheckpointManager>>,
    artifact_store: Option<Arc<ArtifactStore>>,
    progress_callback: Option<ProgressCallback>,
) -> TaskOutcome {
    let _ = deps;
    if step.is_loop() {
        let strategy = LoopStrategy {
            registry: registry.clone(),
            max_workers,
            checkpoint_manager,
            progress_callback,
        };
        return match strategy.execute_loop(step, context).await {
            LoopOutcome::Completed => TaskOutcome::Completed {
                artifacts: Vec::new(),
            },
            LoopOutcome::Failed(msg) => TaskOutcome::Failed(StepFailure::Other(msg)),
            LoopOutcome::Suspended(info) => TaskOutcome::Suspended(info),
        };
    }

    let step_scope = context.spawn_child(Default::default());
    let input = match InputResolver::resolve(step, connections, &step_scope, &[]) {
        Ok(v) => v,
        Err(e) => return TaskOutcome::Failed(StepFailure::Input(e)),
    };

    if let Some(pipeline_id) = step.plugin.strip_prefix(crate::plugin_registry::NESTED_PIPELINE_PREFIX) {
        return run_nested_pipeline(
            pipeline_id,
            &step.name,
            input,
            &step_scope,
            context,
            registry,
            max_workers,
            progress_callback,
        )
        .await;
    }

    let Some(plugin) = registry.get(&step.plugin) else {
        return TaskOutcome::Failed(StepFailure::Other(format!(
            "plugin '{}' not found at run time",
            step.plugin
        )));
    };

    let invoker = PluginInvoker::new(retry_policy);
    let outcome = invoker.invoke(plugin.as_ref(), input, &step_scope).await;
    step_scope.merge_into_parent();

    match outcome {
        PluginOutcome::Success(value) => {
            if let Err(e) = OutputHandler::handle(plugin.as_ref(), &step.name, value.clone(), context) {
                return TaskOutcome::Failed(StepFailure::Plugin(e));
            }
            if let Some(store) = &artifact_store {
                let command = store
                    .save(&context.task_id, &format!("{}.json", step.name), ArtifactContent::Json(value), None)
                    .await;
                if ArtifactStore::is_success(&command) {
                    context.record_artifact(command);
                } else {
                    warn!(step = %step.name, "failed to persist step output artifact");
                }
            }
            let artifacts = context
                .artifacts()
                .into_iter()
                .filter(|a| a.task_id == context.task_id)
                .map(|a| a.filename)
                .collect();
            TaskOutcome::Completed { artifacts }
        }
        PluginOutcome::InputError(e) => TaskOutcome::Failed(StepFailure::Input(e)),
        PluginOutcome::PluginError(e) => TaskOutcome::Failed(StepFailure::Plugin(e)),
        PluginOutcome::RetryableError(e) => TaskOutcome::Failed(StepFailure::Retryable(e)),
        PluginOutcome::Suspended(info) => TaskOutcome::Suspended(info),
    }
}

/// Runs a `"pipeline.<id>"` step: resolved input fields become the
/// nested pipeline's param bindings, its steps run through a fresh
/// nested scheduler sharing the registry and concurrency limit (no
/// checkpoint manager of its own, mirroring `LoopStrategy::run_loop_body`
/// so the top-level scheduler stays the sole durable checkpoint writer),
/// and its final context becomes this step's own output.
async fn run_nested_pipeline(
    pipeline_id: &str,
    step_name: &str,
    input: Value,
    step_scope: &Context,
    context: &Context,
    registry: &Arc<PluginRegistry>,
    max_workers: usize,
    progress_callback: Option<ProgressCallback>,
) -> TaskOutcome {
    let Some(definition) = registry.get_pipeline(pipeline_id) else {
        return TaskOutcome::Failed(StepFailure::Other(format!(
            "nested pipeline '{pipeline_id}' not found at run time"
        )));
    };

    if let Value::Object(map) = &input {
        for (k, v) in map {
            step_scope.set(k.clone(), v.clone());
        }
    }

    let mut nested = Scheduler::new(registry.clone(), max_workers);
    if let Some(cb) = progress_callback {
        nested.set_progress_callback(cb);
    }

    match nested.execute(step_scope, &definition.steps, None).await {
        Ok(_) => {
            let output = serde_json::to_value(step_scope.flatten()).unwrap_or(Value::Null);
            step_scope.merge_into_parent();
            context.set(step_name, output);
            let artifacts = context
                .artifacts()
                .into_iter()
                .filter(|a| a.task_id == context.task_id)
                .map(|a| a.filename)
                .collect();
            TaskOutcome::Completed { artifacts }
        }
        Err(SchedulerOutcome::Suspended(s)) => {
            step_scope.merge_into_parent();
            TaskOutcome::Suspended(SuspendInfo {
                reason: format!(
                    "nested pipeline '{pipeline_id}' suspended at step(s): {:?}",
                    s.suspended_steps
                ),
                data: BTreeMap::new(),
            })
        }
        Err(SchedulerOutcome::Failed(e)) => TaskOutcome::Failed(StepFailure::Other(e.to_string())),
        Err(SchedulerOutcome::Validation(e)) => TaskOutcome::Failed(StepFailure::Other(e.to_string())),
        Err(SchedulerOutcome::Checkpoint(e)) => TaskOutcome::Failed(StepFailure::Other(e.to_string())),
    }
}

/// Groups steps sharing an identical dependency set for reporting only;
/// does not affect scheduling.
fn identify_parallel_groups(
    steps: &[StepConfig],
    parsed: &ParsedDependencies,
) -> HashMap<String, String> {
    let mut groups_by_deps: HashMap<Vec<String>, Vec<String>> = HashMap::new();
    for step in steps {
        let mut dep_names: Vec<String> = parsed
            .get(&step.name)
            .into_iter()
            .flatten()
            .map(|d| d.step_name.clone())
            .collect();
        dep_names.sort();
        groups_by_deps.entry(dep_names).or_default().push(step.name.clone());
    }

    let mut out = HashMap::new();
    for (deps, members) in groups_by_deps {
        let label = if members.len() > 1 {
            format!("parallel_after_{}", deps.join("_"))
        } else {
            "sequential".to_string()
        };
        for m in members {
            out.insert(m, label.clone());
        }
    }
    out
}
