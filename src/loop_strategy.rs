//! Loop-step execution: collection/count/condition-driven iteration
//! over a synthesized or explicit body, each iteration running in its
//! own child context through a nested scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::checkpoint::CheckpointManager;
use crate::context::{Context, LoopScope};
use crate::errors::SuspendInfo;
use crate::plugin_registry::PluginRegistry;
use crate::scheduler::{ProgressCallback, Scheduler, SchedulerOutcome};
use crate::step_config::{LoopConfig, StepConfig};

pub enum LoopOutcome {
    Completed,
    Failed(String),
    Suspended(SuspendInfo),
}

enum LoopBodyOutcome {
    Completed,
    Failed(String),
    Suspended(SuspendInfo),
}

pub struct LoopStrategy {
    pub registry: Arc<PluginRegistry>,
    pub max_workers: usize,
    pub checkpoint_manager: Option<Arc<CheckpointManager>>,
    pub progress_callback: Option<ProgressCallback>,
}

impl LoopStrategy {
    pub async fn execute_loop(&self, step: &StepConfig, parent_context: &Context) -> LoopOutcome {
        let Some(loop_config) = &step.loop_config else {
            return LoopOutcome::Failed(format!("step '{}' has no loop_config", step.name));
        };

        let loop_context = parent_context.spawn_child(Default::default());
        let body = synthesize_body(step, loop_config);

        let is_condition_only =
            loop_config.condition.is_some() && loop_config.collection.is_none() && loop_config.count.is_none();

        let outcome = if is_condition_only {
            self.run_condition_loop(step, loop_config, &body, &loop_context).await
        } else {
            self.run_collection_or_count_loop(step, loop_config, &body, &loop_context)
                .await
        };

        // Partial progress is preserved on both success and suspension,
        // so a checkpoint taken after re-raising still has it. A plain
        // failure is left unmerged: the step is FAILED and its iteration
        // data should not leak into sibling steps' view of the context.
        match &outcome {
            LoopOutcome::Completed | LoopOutcome::Suspended(_) => loop_context.merge_into_parent(),
            LoopOutcome::Failed(_) => {}
        }

        outcome
    }

    async fn run_collection_or_count_loop(
        &self,
        step: &StepConfig,
        loop_config: &LoopConfig,
        body: &[StepConfig],
        loop_context: &Context,
    ) -> LoopOutcome {
        let items: Vec<Value> = if let Some(collection_key) = &loop_config.collection {
            match loop_context.get(collection_key) {
                Some(Value::Array(arr)) => arr,
                Some(other) => vec![other],
                None => {
                    warn!(
                        step = %step.name,
                        collection = %collection_key,
                        "loop collection did not resolve; running zero iterations"
                    );
                    Vec::new()
                }
            }
        } else if let Some(count) = loop_config.count {
            (0..count).map(Value::from).collect()
        } else {
            Vec::new()
        };

        if items.is_empty() {
            return LoopOutcome::Completed;
        }

        let mut any_iteration_failed = false;
        let last_index = items.len() - 1;

        for (index, item) in items.iter().enumerate() {
            let marker = processed_marker(item);
            if loop_context
                .get(&marker)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                debug!(step = %step.name, index, "skipping already-processed loop iteration on resume");
                continue;
            }

            let mut overrides = BTreeMap::new();
            overrides.insert(loop_config.item_name.clone(), item.clone());
            overrides.insert(loop_config.index_name.clone(), Value::from(index as u64));
            let iteration_context = loop_context.spawn_child(overrides);
            iteration_context.set_loop_scope(LoopScope {
                step_name: step.name.clone(),
                iteration_index: index,
                item_binding: Some((loop_config.item_name.clone(), item.clone())),
                index_binding: Some((loop_config.index_name.clone(), Value::from(index as u64))),
            });

            match self.run_loop_body(body, &iteration_context).await {
                LoopBodyOutcome::Completed => {
                    iteration_context.set(marker, Value::from(true));
                    iteration_context.merge_into_parent();
                }
                LoopBodyOutcome::Suspended(info) => {
                    iteration_context.merge_into_parent();
                    return LoopOutcome::Suspended(info);
                }
                LoopBodyOutcome::Failed(msg) => {
                    any_iteration_failed = true;
                    iteration_context.merge_into_parent();
                    if loop_config.fail_fast {
                        return LoopOutcome::Failed(msg);
                    }
                }
            }

            if loop_config.delay_ms > 0 && index != last_index {
                tokio::time::sleep(Duration::from_millis(loop_config.delay_ms)).await;
            }
        }

        if any_iteration_failed {
            LoopOutcome::Failed(format!(
                "one or more iterations of loop step '{}' failed",
                step.name
            ))
        } else {
            LoopOutcome::Completed
        }
    }

    async fn run_condition_loop(
        &self,
        step: &StepConfig,
        loop_config: &LoopConfig,
        body: &[StepConfig],
        loop_context: &Context,
    ) -> LoopOutcome {
        let condition_key = loop_config
            .condition
            .as_ref()
            .expect("caller only reaches here when condition is set");

        let mut counter: u64 = 0;
        let mut any_iteration_failed = false;
        let mut reached_max = false;

        loop {
            if counter >= loop_config.max_iterations {
                reached_max = true;
                break;
            }
            if !is_truthy(loop_context.get(condition_key)) {
                break;
            }

            let mut overrides = BTreeMap::new();
            overrides.insert(loop_config.item_name.clone(), Value::from(counter));
            overrides.insert(loop_config.index_name.clone(), Value::from(counter));
            let iteration_context = loop_context.spawn_child(overrides);
            iteration_context.set_loop_scope(LoopScope {
                step_name: step.name.clone(),
                iteration_index: counter as usize,
                item_binding: Some((loop_config.item_name.clone(), Value::from(counter))),
                index_binding: Some((loop_config.index_name.clone(), Value::from(counter))),
            });

            let body_outcome = self.run_loop_body(body, &iteration_context).await;
            // Unlike the collection/count loop, a condition loop merges
            // on every outcome: the next iteration's condition check
            // must see the latest state even after a non-fatal failure.
            iteration_context.merge_into_parent();

            match body_outcome {
                LoopBodyOutcome::Completed => {}
                LoopBodyOutcome::Suspended(info) => return LoopOutcome::Suspended(info),
                LoopBodyOutcome::Failed(msg) => {
                    any_iteration_failed = true;
                    if loop_config.fail_fast {
                        return LoopOutcome::Failed(msg);
                    }
                }
            }

            counter += 1;

            let will_continue =
                counter < loop_config.max_iterations && is_truthy(loop_context.get(condition_key));
            if loop_config.delay_ms > 0 && will_continue {
                tokio::time::sleep(Duration::from_millis(loop_config.delay_ms)).await;
            }
        }

        if reached_max {
            warn!(
                step = %step.name,
                max_iterations = loop_config.max_iterations,
                "condition loop reached max_iterations without the condition becoming false"
            );
        }

        if any_iteration_failed {
            LoopOutcome::Failed(format!(
                "one or more iterations of loop step '{}' failed",
                step.name
            ))
        } else {
            LoopOutcome::Completed
        }
    }

    /// Runs `body` to completion against `iteration_context` via a fresh
    /// nested scheduler sharing this loop's registry, concurrency limit,
    /// and progress callback. The nested scheduler never checkpoints on
    /// its own; a suspension bubbles up so the top-level scheduler is the
    /// one durable checkpoint writer.
    async fn run_loop_body(&self, body: &[StepConfig], iteration_context: &Context) -> LoopBodyOutcome {
        let mut nested = Scheduler::new(self.registry.clone(), self.max_workers);
        if let Some(cb) = &self.progress_callback {
            nested.set_progress_callback(cb.clone());
        }

        match nested.execute(iteration_context, body, None).await {
            Ok(_) => LoopBodyOutcome::Completed,
            Err(SchedulerOutcome::Suspended(s)) => LoopBodyOutcome::Suspended(SuspendInfo {
                reason: format!("loop body suspended at step(s): {:?}", s.suspended_steps),
                data: BTreeMap::new(),
            }),
            Err(SchedulerOutcome::Failed(e)) => LoopBodyOutcome::Failed(e.to_string()),
            Err(SchedulerOutcome::Validation(e)) => LoopBodyOutcome::Failed(e.to_string()),
            Err(SchedulerOutcome::Checkpoint(e)) => LoopBodyOutcome::Failed(e.to_string()),
        }
    }
}

/// Builds the step list to run for one iteration. A step already
/// carrying an explicit body (or naming the nested-pipeline plugin)
/// runs as declared; otherwise a single synthetic step is built from
/// the loop step's own plugin and config, so a loop can wrap a single
/// leaf plugin without a nested `body:` list.
fn synthesize_body(step: &StepConfig, loop_config: &LoopConfig) -> Vec<StepConfig> {
    if step.plugin.starts_with(crate::plugin_registry::NESTED_PIPELINE_PREFIX)
        || !loop_config.body.is_empty()
    {
        return loop_config.body.clone();
    }

    vec![StepConfig {
        name: format!("{}_iteration", step.name),
        plugin: step.plugin.clone(),
        depends_on: Vec::new(),
        fail_on_error: step.fail_on_error,
        is_finally: false,
        config: step.config.clone(),
        connections: step.connections.clone(),
        loop_config: None,
    }]
}

fn processed_marker(item: &Value) -> String {
    format!("item_{}_processed", value_repr(item))
}

fn value_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: Option<Value>) -> bool {
    match value {
        None => false,
        Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(m)) => !m.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordItem(Arc<AtomicUsize>);
    #[async_trait]
    impl Plugin for RecordItem {
        fn name(&self) -> &str {
            "record_item"
        }
        async fn run(&self, input: Value, context: &Context) -> PluginOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            context.set("seen", input.clone());
            PluginOutcome::Success(input)
        }
    }

    fn loop_step(name: &str, loop_config: LoopConfig) -> StepConfig {
        StepConfig {
            name: name.into(),
            plugin: "record_item".into(),
            loop_config: Some(loop_config),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn collection_loop_runs_once_per_item() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register("record_item", Arc::new(RecordItem(calls.clone())));

        let strategy = LoopStrategy {
            registry: Arc::new(registry),
            max_workers: 2,
            checkpoint_manager: None,
            progress_callback: None,
        };

        let ctx = Context::new("t-1", None);
        ctx.set("items", Value::from(vec!["a", "b", "c"]));

        let step = loop_step(
            "process_items",
            LoopConfig {
                collection: Some("items".into()),
                ..Default::default()
            },
        );

        let outcome = strategy.execute_loop(&step, &ctx).await;
        assert!(matches!(outcome, LoopOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn count_loop_with_zero_count_completes_with_no_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register("record_item", Arc::new(RecordItem(calls.clone())));

        let strategy = LoopStrategy {
            registry: Arc::new(registry),
            max_workers: 2,
            checkpoint_manager: None,
            progress_callback: None,
        };

        let ctx = Context::new("t-1", None);
        let step = loop_step(
            "retry_zero",
            LoopConfig {
                count: Some(0),
                ..Default::default()
            },
        );

        let outcome = strategy.execute_loop(&step, &ctx).await;
        assert!(matches!(outcome, LoopOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn condition_loop_stops_once_condition_goes_false() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register("record_item", Arc::new(RecordItem(calls.clone())));

        let strategy = LoopStrategy {
            registry: Arc::new(registry),
            max_workers: 2,
            checkpoint_manager: None,
            progress_callback: None,
        };

        let ctx = Context::new("t-1", None);
        ctx.set("keep_going", Value::from(true));

        // A condition loop re-checks `keep_going` against the same
        // loop-scoped context every iteration; since nothing in this
        // test clears it, it runs until max_iterations.
        let step = loop_step(
            "poll",
            LoopConfig {
                condition: Some("keep_going".into()),
                max_iterations: 3,
                ..Default::default()
            },
        );

        let outcome = strategy.execute_loop(&step, &ctx).await;
        assert!(matches!(outcome, LoopOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
