//! Per-step and per-run state machine.
//!
//! Every step moves through PENDING/RUNNING/COMPLETED/FAILED/SKIPPED/
//! SUSPENDED, with readiness and skip predicates driven by declared
//! (and conditional) dependencies.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag_validator::ParsedDependency;
use crate::errors::StepFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Suspended,
}

impl StepStatus {
    pub fn is_terminal_for_normal_phase(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub saved_artifacts: Vec<String>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            error: None,
            saved_artifacts: Vec::new(),
        }
    }
}

/// Owns the state of every step in one DAG run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagState {
    pub step_states: BTreeMap<String, StepState>,
    /// Stable declaration order, used for tie-breaking and reporting.
    pub step_numbers: BTreeMap<String, usize>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl DagState {
    pub fn new(step_names_in_order: &[String]) -> Self {
        let mut step_states = BTreeMap::new();
        let mut step_numbers = BTreeMap::new();
        for (i, name) in step_names_in_order.iter().enumerate() {
            step_states.insert(name.clone(), StepState::default());
            step_numbers.insert(name.clone(), i);
        }
        Self {
            step_states,
            step_numbers,
            start_time: None,
            end_time: None,
        }
    }

    /// Adds any steps present in `step_names_in_order` but absent from
    /// this state as fresh PENDING entries appended at the end. Used when
    /// resuming a checkpoint against a pipeline definition that has grown
    /// new steps since the checkpoint was taken.
    pub fn reconcile_with_definition(&mut self, step_names_in_order: &[String]) {
        let mut next_number = self.step_numbers.values().copied().max().map_or(0, |m| m + 1);
        for name in step_names_in_order {
            if !self.step_states.contains_key(name) {
                self.step_states.insert(name.clone(), StepState::default());
                self.step_numbers.insert(name.clone(), next_number);
                next_number += 1;
            }
        }
    }

    /// Steps present in this state but no longer in the current
    /// definition. Per design, restoring such a checkpoint is rejected.
    pub fn removed_steps(&self, step_names_in_order: &[String]) -> Vec<String> {
        let current: BTreeSet<&String> = step_names_in_order.iter().collect();
        self.step_states
            .keys()
            .filter(|name| !current.contains(name))
            .cloned()
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.step_states.get(name).map(|s| s.status)
    }

    pub fn completed_steps(&self) -> BTreeSet<String> {
        self.by_status(StepStatus::Completed)
    }

    pub fn failed_steps(&self) -> BTreeSet<String> {
        self.by_status(StepStatus::Failed)
    }

    pub fn running_steps(&self) -> BTreeSet<String> {
        self.by_status(StepStatus::Running)
    }

    pub fn skipped_steps(&self) -> BTreeSet<String> {
        self.by_status(StepStatus::Skipped)
    }

    pub fn suspended_steps(&self) -> BTreeSet<String> {
        self.by_status(StepStatus::Suspended)
    }

    fn by_status(&self, status: StepStatus) -> BTreeSet<String> {
        self.step_states
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// True iff `name` is PENDING and every dependency is satisfied:
    /// non-conditional deps are COMPLETED; conditional deps are COMPLETED
    /// *and* their recorded output satisfies the predicate.
    pub fn is_ready(
        &self,
        name: &str,
        deps: &[ParsedDependency],
        context: &crate::context::Context,
    ) -> bool {
        if self.status_of(name) != Some(StepStatus::Pending) {
            return false;
        }
        deps.iter().all(|dep| self.dependency_satisfied(dep, context))
    }

    /// True iff `name` is a finally step that is PENDING and all of its
    /// (finally-scoped) dependencies are satisfied, given that finally
    /// steps only begin once every non-finally step has reached a
    /// terminal state (enforced by the caller).
    pub fn is_ready_for_finally(&self, name: &str, deps: &[ParsedDependency]) -> bool {
        if self.status_of(name) != Some(StepStatus::Pending) {
            return false;
        }
        deps.iter().all(|dep| {
            matches!(
                self.status_of(&dep.step_name),
                Some(StepStatus::Completed) | Some(StepStatus::Skipped)
            )
        })
    }

    fn dependency_satisfied(&self, dep: &ParsedDependency, context: &crate::context::Context) -> bool {
        match self.status_of(&dep.step_name) {
            Some(StepStatus::Completed) => match &dep.predicate {
                None => true,
                Some(expected) => context
                    .get(&dep.step_name)
                    .map(|actual| output_equals(&actual, expected))
                    .unwrap_or(false),
            },
            _ => false,
        }
    }

    /// Whether `name` should be SKIPPED: some non-conditional dependency
    /// FAILED with `fail_on_error=true`, or a conditional dependency
    /// COMPLETED but its predicate is unmet.
    pub fn should_skip(
        &self,
        name: &str,
        deps: &[ParsedDependency],
        context: &crate::context::Context,
    ) -> bool {
        if self.status_of(name) != Some(StepStatus::Pending) {
            return false;
        }
        deps.iter().any(|dep| match self.status_of(&dep.step_name) {
            Some(StepStatus::Failed) => dep.dependency_is_critical,
            Some(StepStatus::Skipped) => true,
            Some(StepStatus::Completed) => {
                if let Some(expected) = &dep.predicate {
                    let actual = context.get(&dep.step_name);
                    !actual.map(|a| output_equals(&a, expected)).unwrap_or(false)
                } else {
                    false
                }
            }
            _ => false,
        })
    }

    pub fn mark_running(&mut self, name: &str) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Running;
            s.start_time = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self, name: &str, artifacts: Vec<String>) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Completed;
            s.end_time = Some(Utc::now());
            s.error = None;
            s.saved_artifacts = artifacts;
        }
    }

    pub fn mark_failed(&mut self, name: &str, error: &StepFailure) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Failed;
            s.end_time = Some(Utc::now());
            s.error = Some(error.to_string());
        }
    }

    pub fn mark_skipped(&mut self, name: &str) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Skipped;
            s.end_time = Some(Utc::now());
        }
    }

    pub fn mark_suspended(&mut self, name: &str) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Suspended;
        }
    }

    /// A suspended step was finished externally during suspension;
    /// transition it directly to COMPLETED and clear its error.
    pub fn mark_completed_from_suspension(&mut self, name: &str) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Completed;
            s.end_time = Some(Utc::now());
            s.error = None;
        }
    }

    /// Transitions a suspended step back to PENDING for re-entry,
    /// clearing any recorded error.
    pub fn reset_for_resume(&mut self, name: &str) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.status = StepStatus::Pending;
            s.error = None;
        }
    }

    pub fn clear_step_error(&mut self, name: &str) {
        if let Some(s) = self.step_states.get_mut(name) {
            s.error = None;
        }
    }

    pub fn step_number(&self, name: &str) -> usize {
        *self.step_numbers.get(name).unwrap_or(&usize::MAX)
    }

    pub fn all_non_finally_terminal(&self, finally_steps: &BTreeSet<String>) -> bool {
        self.step_states
            .iter()
            .filter(|(name, _)| !finally_steps.contains(*name))
            .all(|(_, s)| s.status.is_terminal_for_normal_phase() || s.status == StepStatus::Suspended)
    }
}

fn output_equals(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        other => other.to_string().trim_matches('"') == expected,
    }
}
