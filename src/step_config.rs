//! Declarative pipeline and step definitions, and their YAML loading.
//!
//! A `PipelineDefinition` is a named, parameterized DAG of `StepConfig`
//! entries: conditional dependencies, explicit connections,
//! `fail_on_error`/`is_finally`, and loop configuration.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

/// A dependency edge, optionally gated by a predicate on the source
/// step's recorded output (`{step, when_output_equals}`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Dependency {
    Bare(String),
    Conditional {
        step: String,
        when_output_equals: String,
    },
}

impl Dependency {
    pub fn step_name(&self) -> &str {
        match self {
            Dependency::Bare(s) => s,
            Dependency::Conditional { step, .. } => step,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Typed parameter declaration for a `PipelineDefinition`.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

/// Loop iteration driver: exactly one of `collection`, `count`,
/// `condition` is expected to be meaningful at runtime; validation does
/// not enforce mutual exclusivity since a config may carry unused
/// leftover fields — the loop strategy picks in that priority order.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub body: Vec<StepConfig>,
    pub collection: Option<String>,
    pub count: Option<u64>,
    pub condition: Option<String>,
    #[serde(default = "default_item_name")]
    pub item_name: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    pub result_name: Option<String>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

fn default_item_name() -> String {
    "item".to_string()
}
fn default_index_name() -> String {
    "index".to_string()
}
fn default_max_iterations() -> u64 {
    1000
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            body: Vec::new(),
            collection: None,
            count: None,
            condition: None,
            item_name: default_item_name(),
            index_name: default_index_name(),
            result_name: None,
            delay_ms: 0,
            fail_fast: false,
            max_iterations: default_max_iterations(),
        }
    }
}

/// Declarative unit of work in a pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    #[serde(default = "default_true")]
    pub fail_on_error: bool,
    #[serde(default, rename = "finally")]
    pub is_finally: bool,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub connections: HashMap<String, String>,
    #[serde(default)]
    pub loop_config: Option<LoopConfig>,
}

impl StepConfig {
    pub fn is_loop(&self) -> bool {
        self.loop_config.is_some()
    }
}

impl Default for StepConfig {
    fn default() -> Self {
        StepConfig {
            name: String::new(),
            plugin: "noop".into(),
            depends_on: vec![],
            fail_on_error: true,
            is_finally: false,
            config: HashMap::new(),
            connections: HashMap::new(),
            loop_config: None,
        }
    }
}

/// A named, parameterized DAG of steps, as loaded from a YAML document.
#[derive(Debug, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    pub steps: Vec<StepConfig>,
}

/// Loads a pipeline definition from a YAML file on disk.
pub fn load_pipeline(path: &Path) -> anyhow::Result<PipelineDefinition> {
    let yaml = std::fs::read_to_string(path)?;
    let def: PipelineDefinition = serde_yaml::from_str(&yaml)?;
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conditional_and_bare_dependencies() {
        let yaml = r#"
id: demo
steps:
  - name: a
    plugin: echo
  - name: b
    plugin: upper
    depends_on:
      - a
  - name: c
    plugin: upper
    depends_on:
      - step: a
        when_output_equals: "ok"
"#;
        let def: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.steps[1].depends_on[0], Dependency::Bare("a".into()));
        match &def.steps[2].depends_on[0] {
            Dependency::Conditional {
                step,
                when_output_equals,
            } => {
                assert_eq!(step, "a");
                assert_eq!(when_output_equals, "ok");
            }
            other => panic!("expected conditional dependency, got {other:?}"),
        }
    }

    #[test]
    fn fail_on_error_defaults_true() {
        let yaml = r#"
id: demo
steps:
  - name: a
    plugin: echo
"#;
        let def: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.steps[0].fail_on_error);
        assert!(!def.steps[0].is_finally);
    }
}
