//! Per-run keyed data store shared across steps.
//!
//! Mirrors the delegation-style `ExecutionContext` of the reference
//! implementation. `Context` is a tree of scopes rather than one flat
//! map: `spawn_child` creates a new scope with its own writable frame
//! that shadows the parent for reads, without mutating the parent.
//! Concurrent children of the same parent each own an independent
//! frame, so concurrently-running steps never race on each other's
//! writes; `merge_into_parent` explicitly flattens a finished scope's
//! frame back into its parent (used at loop-iteration boundaries).

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies which loop iteration (if any) a context frame belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopScope {
    pub step_name: String,
    pub iteration_index: usize,
    pub item_binding: Option<(String, Value)>,
    pub index_binding: Option<(String, Value)>,
}

/// A snapshot of a `Context`'s data, suitable for embedding in a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub data: BTreeMap<String, Value>,
    pub artifacts: Vec<crate::artifacts::commands::ArtifactCommand>,
    pub resume_data: BTreeMap<String, Value>,
}

struct ContextData {
    frame: RwLock<BTreeMap<String, Value>>,
    artifacts: RwLock<Vec<crate::artifacts::commands::ArtifactCommand>>,
    loop_scope: RwLock<Option<LoopScope>>,
    resume_data: RwLock<BTreeMap<String, Value>>,
    parent: Option<Context>,
}

/// A scoped handle into the execution context tree.
#[derive(Clone)]
pub struct Context {
    pub task_id: String,
    pub pipeline_id: Option<String>,
    inner: Arc<ContextData>,
}

impl Context {
    pub fn new(task_id: impl Into<String>, pipeline_id: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            pipeline_id,
            inner: Arc::new(ContextData {
                frame: RwLock::new(BTreeMap::new()),
                artifacts: RwLock::new(Vec::new()),
                loop_scope: RwLock::new(None),
                resume_data: RwLock::new(BTreeMap::new()),
                parent: None,
            }),
        }
    }

    /// Reads a key from this scope, falling through to ancestors.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.inner.frame.read().expect("context lock poisoned").get(key) {
            return Some(v.clone());
        }
        self.inner.parent.as_ref().and_then(|p| p.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Writes a key into this scope's own frame.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner
            .frame
            .write()
            .expect("context lock poisoned")
            .insert(key.into(), value);
    }

    /// Spawns an isolated child scope seeded with `overrides`.
    pub fn spawn_child(&self, overrides: BTreeMap<String, Value>) -> Context {
        Context {
            task_id: self.task_id.clone(),
            pipeline_id: self.pipeline_id.clone(),
            inner: Arc::new(ContextData {
                frame: RwLock::new(overrides),
                artifacts: RwLock::new(Vec::new()),
                loop_scope: RwLock::new(None),
                resume_data: RwLock::new(BTreeMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Flattens this scope's own frame and artifacts into its immediate
    /// parent. A no-op for the root scope. Used when a loop iteration (or
    /// other transient scope) ends and its accumulated writes should
    /// become visible going forward.
    pub fn merge_into_parent(&self) {
        let Some(parent) = self.inner.parent.as_ref() else {
            return;
        };
        let own = self.inner.frame.read().expect("context lock poisoned");
        let mut parent_frame = parent.inner.frame.write().expect("context lock poisoned");
        for (k, v) in own.iter() {
            parent_frame.insert(k.clone(), v.clone());
        }
        drop(parent_frame);

        let own_artifacts = self.inner.artifacts.read().expect("context lock poisoned");
        parent
            .inner
            .artifacts
            .write()
            .expect("context lock poisoned")
            .extend(own_artifacts.iter().cloned());
    }

    pub fn set_loop_scope(&self, scope: LoopScope) {
        *self.inner.loop_scope.write().expect("context lock poisoned") = Some(scope);
    }

    pub fn loop_scope(&self) -> Option<LoopScope> {
        self.inner
            .loop_scope
            .read()
            .expect("context lock poisoned")
            .clone()
    }

    pub fn record_artifact(&self, artifact: crate::artifacts::commands::ArtifactCommand) {
        self.inner
            .artifacts
            .write()
            .expect("context lock poisoned")
            .push(artifact);
    }

    /// All artifacts visible from this scope, own plus ancestors'.
    pub fn artifacts(&self) -> Vec<crate::artifacts::commands::ArtifactCommand> {
        let mut out = self
            .inner
            .parent
            .as_ref()
            .map(|p| p.artifacts())
            .unwrap_or_default();
        out.extend(
            self.inner
                .artifacts
                .read()
                .expect("context lock poisoned")
                .iter()
                .cloned(),
        );
        out
    }

    pub fn resume_data_for(&self, step_name: &str) -> Option<Value> {
        if let Some(v) = self
            .inner
            .resume_data
            .read()
            .expect("context lock poisoned")
            .get(step_name)
        {
            return Some(v.clone());
        }
        self.inner
            .parent
            .as_ref()
            .and_then(|p| p.resume_data_for(step_name))
    }

    pub fn set_resume_data(&self, data: BTreeMap<String, Value>) {
        *self
            .inner
            .resume_data
            .write()
            .expect("context lock poisoned") = data;
    }

    /// Flattens this scope's full ancestry into a single map, root-first
    /// so closer scopes win, for checkpointing or template expansion.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut out = self
            .inner
            .parent
            .as_ref()
            .map(|p| p.flatten())
            .unwrap_or_default();
        for (k, v) in self.inner.frame.read().expect("context lock poisoned").iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            data: self.flatten(),
            artifacts: self.artifacts(),
            resume_data: self
                .inner
                .resume_data
                .read()
                .expect("context lock poisoned")
                .clone(),
        }
    }

    /// Restores data from a checkpoint snapshot into a fresh root context.
    pub fn restore_from_snapshot(&self, snapshot: &ContextSnapshot) {
        *self.inner.frame.write().expect("context lock poisoned") = snapshot.data.clone();
        *self.inner.artifacts.write().expect("context lock poisoned") = snapshot.artifacts.clone();
        *self
            .inner
            .resume_data
            .write()
            .expect("context lock poisoned") = snapshot.resume_data.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_overrides_shadow_parent_until_merged() {
        let ctx = Context::new("task-1", None);
        ctx.set("x", Value::from(1));

        let mut overrides = BTreeMap::new();
        overrides.insert("x".to_string(), Value::from(2));
        let child = ctx.spawn_child(overrides);

        assert_eq!(child.get("x"), Some(Value::from(2)));
        assert_eq!(ctx.get("x"), Some(Value::from(1)));

        child.set("y", Value::from("new"));
        child.merge_into_parent();

        assert_eq!(ctx.get("x"), Some(Value::from(2)));
        assert_eq!(ctx.get("y"), Some(Value::from("new")));
    }

    #[test]
    fn flatten_combines_ancestry() {
        let ctx = Context::new("task-1", None);
        ctx.set("a", Value::from(1));
        let child = ctx.spawn_child(BTreeMap::new());
        child.set("b", Value::from(2));

        let flat = child.flatten();
        assert_eq!(flat.get("a"), Some(&Value::from(1)));
        assert_eq!(flat.get("b"), Some(&Value::from(2)));
    }

    #[test]
    fn concurrent_children_do_not_see_each_others_writes() {
        let ctx = Context::new("task-1", None);
        let a = ctx.spawn_child(BTreeMap::new());
        let b = ctx.spawn_child(BTreeMap::new());
        a.set("only_a", Value::from(true));
        b.set("only_b", Value::from(true));

        assert!(a.get("only_b").is_none());
        assert!(b.get("only_a").is_none());
    }
}
