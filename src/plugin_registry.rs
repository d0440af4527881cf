//! Static lookup of plugins and nested pipelines by name.
//!
//! Resolves a `StepConfig::plugin` reference to a callable `Plugin`. A
//! `"pipeline.<id>"` reference instead names another registered
//! `PipelineDefinition`, letting a pipeline be run as a step inside
//! another one; the scheduler runs it through a nested `Scheduler`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::Plugin;
use crate::step_config::PipelineDefinition;

pub const NESTED_PIPELINE_PREFIX: &str = "pipeline.";

#[derive(Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    pipelines: HashMap<String, Arc<PipelineDefinition>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(name.into(), plugin);
    }

    /// Registers a trivial always-succeeds plugin under `name`. Used in
    /// tests that only care about graph shape, not plugin behavior.
    pub fn register_noop(&mut self, name: impl Into<String>) {
        self.register(name, Arc::new(crate::plugins::builtin::NoopPlugin));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// Registers `definition` under its own `id` as a nested-pipeline
    /// target, reachable from another pipeline's step as
    /// `plugin: "pipeline.<id>"`.
    pub fn register_pipeline(&mut self, definition: PipelineDefinition) {
        self.pipelines.insert(definition.id.clone(), Arc::new(definition));
    }

    /// Looks up a registered pipeline by its bare id (without the
    /// `pipeline.` prefix).
    pub fn get_pipeline(&self, id: &str) -> Option<Arc<PipelineDefinition>> {
        self.pipelines.get(id).cloned()
    }

    /// True if `name` resolves: either a registered plugin, or a
    /// `"pipeline.<id>"` reference to a registered nested pipeline.
    pub fn contains(&self, name: &str) -> bool {
        match name.strip_prefix(NESTED_PIPELINE_PREFIX) {
            Some(id) => self.pipelines.contains_key(id),
            None => self.plugins.contains_key(name),
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
