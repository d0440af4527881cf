//! Static validation of a pipeline definition before it is ever run.
//!
//! Checks step names, plugin references, dependency targets, critical/
//! non-critical dependency consistency, and cycles, building a
//! `petgraph` graph purely to run its cycle detection. Every failure is
//! a hard `ValidationError`; nothing here degrades to a warning.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::ValidationError;
use crate::plugin_registry::PluginRegistry;
use crate::step_config::{Dependency, ParamType, StepConfig};

/// One dependency edge, normalized: its source step name plus an
/// optional predicate, and whether *that source step itself* is
/// critical (used by `DagState::should_skip` to decide whether its
/// FAILED status propagates as a skip to this dependent).
#[derive(Debug, Clone)]
pub struct ParsedDependency {
    pub step_name: String,
    pub predicate: Option<String>,
    pub dependency_is_critical: bool,
}

/// `step name -> parsed dependency list`, in declaration order.
pub type ParsedDependencies = HashMap<String, Vec<ParsedDependency>>;

pub struct DagValidator;

impl DagValidator {
    /// Runs every check in order, returning the normalized dependency
    /// map on success.
    pub fn validate(
        steps: &[StepConfig],
        registry: &PluginRegistry,
    ) -> Result<ParsedDependencies, ValidationError> {
        Self::check_unique_nonempty_names(steps)?;
        Self::check_known_plugins(steps, registry)?;
        Self::check_known_dependencies(steps)?;
        Self::check_no_cycles(steps)?;
        let fail_on_error_by_name: HashMap<&str, bool> = steps
            .iter()
            .map(|s| (s.name.as_str(), s.fail_on_error))
            .collect();
        let parsed = Self::build_parsed_dependencies(steps, &fail_on_error_by_name);
        Self::check_critical_dependency_rule(steps, &parsed)?;
        Ok(parsed)
    }

    fn check_unique_nonempty_names(steps: &[StepConfig]) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for step in steps {
            if step.name.trim().is_empty() {
                return Err(ValidationError::EmptyName(step.name.clone()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ValidationError::DuplicateName(step.name.clone()));
            }
        }
        Ok(())
    }

    fn check_known_plugins(
        steps: &[StepConfig],
        registry: &PluginRegistry,
    ) -> Result<(), ValidationError> {
        for step in steps {
            // Loop steps without an inline body delegate to a plugin only
            // via the synthesized body, but the plugin reference itself
            // must still resolve for both loop and non-loop steps.
            if !registry.contains(&step.plugin) {
                return Err(ValidationError::UnknownPlugin {
                    step: step.name.clone(),
                    plugin: step.plugin.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_known_dependencies(steps: &[StepConfig]) -> Result<(), ValidationError> {
        let names: HashSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        for step in steps {
            for dep in &step.depends_on {
                if !names.contains(dep.step_name()) {
                    return Err(ValidationError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.step_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_no_cycles(steps: &[StepConfig]) -> Result<(), ValidationError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
        for step in steps {
            let idx = graph.add_node(step.name.as_str());
            indices.insert(step.name.as_str(), idx);
        }
        for step in steps {
            let to = indices[step.name.as_str()];
            for dep in &step.depends_on {
                if let Some(&from) = indices.get(dep.step_name()) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(ValidationError::Cycle(graph[cycle.node_id()].to_string()));
        }
        Ok(())
    }

    fn build_parsed_dependencies(
        steps: &[StepConfig],
        fail_on_error_by_name: &HashMap<&str, bool>,
    ) -> ParsedDependencies {
        let mut out = ParsedDependencies::new();
        for step in steps {
            let deps = step
                .depends_on
                .iter()
                .map(|dep| ParsedDependency {
                    step_name: dep.step_name().to_string(),
                    predicate: match dep {
                        Dependency::Bare(_) => None,
                        Dependency::Conditional {
                            when_output_equals, ..
                        } => Some(when_output_equals.clone()),
                    },
                    dependency_is_critical: *fail_on_error_by_name
                        .get(dep.step_name())
                        .unwrap_or(&true),
                })
                .collect();
            out.insert(step.name.clone(), deps);
        }
        out
    }

    fn check_critical_dependency_rule(
        steps: &[StepConfig],
        parsed: &ParsedDependencies,
    ) -> Result<(), ValidationError> {
        let fail_on_error_by_name: HashMap<&str, bool> = steps
            .iter()
            .map(|s| (s.name.as_str(), s.fail_on_error))
            .collect();
        for step in steps {
            if !step.fail_on_error {
                continue;
            }
            for dep in parsed.get(&step.name).into_iter().flatten() {
                if !*fail_on_error_by_name.get(dep.step_name.as_str()).unwrap_or(&true) {
                    return Err(ValidationError::CriticalDependsOnNonCritical {
                        step: step.name.clone(),
                        dependency: dep.step_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn check_param_types(params: &[crate::step_config::ParamDecl]) -> Result<(), ValidationError> {
        for p in params {
            match p.param_type {
                ParamType::String | ParamType::Integer | ParamType::Boolean => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_registry::PluginRegistry;
    use crate::step_config::StepConfig;

    fn step(name: &str, plugin: &str, deps: Vec<&str>) -> StepConfig {
        StepConfig {
            name: name.into(),
            plugin: plugin.into(),
            depends_on: deps.into_iter().map(|d| crate::step_config::Dependency::Bare(d.into())).collect(),
            ..Default::default()
        }
    }

    fn registry_with(names: &[&str]) -> PluginRegistry {
        let mut r = PluginRegistry::new();
        for n in names {
            r.register_noop(n);
        }
        r
    }

    #[test]
    fn detects_cycle() {
        let steps = vec![step("a", "echo", vec!["b"]), step("b", "echo", vec!["a"])];
        let reg = registry_with(&["echo"]);
        let err = DagValidator::validate(&steps, &reg).unwrap_err();
        assert!(matches!(err, ValidationError::Cycle(_)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let steps = vec![step("a", "echo", vec!["missing"])];
        let reg = registry_with(&["echo"]);
        let err = DagValidator::validate(&steps, &reg).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_critical_depending_on_non_critical() {
        let mut b = step("b", "echo", vec![]);
        b.fail_on_error = false;
        let a = step("a", "echo", vec!["b"]);
        let reg = registry_with(&["echo"]);
        let err = DagValidator::validate(&[b, a], &reg).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::CriticalDependsOnNonCritical { .. }
        ));
    }

    #[test]
    fn dependency_is_critical_reflects_the_dependency_not_the_dependent() {
        let a = step("a", "echo", vec![]);
        let mut b = step("b", "echo", vec!["a"]);
        b.fail_on_error = false;
        let reg = registry_with(&["echo"]);
        let parsed = DagValidator::validate(&[a, b], &reg).unwrap();
        assert!(parsed["b"][0].dependency_is_critical);
    }

    #[test]
    fn accepts_valid_linear_pipeline() {
        let steps = vec![step("a", "echo", vec![]), step("b", "echo", vec!["a"])];
        let reg = registry_with(&["echo"]);
        let parsed = DagValidator::validate(&steps, &reg).unwrap();
        assert_eq!(parsed["b"][0].step_name, "a");
    }
}
