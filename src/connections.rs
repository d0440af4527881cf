//! Resolves a step's declared `connections` map into source lookups.
//!
//! Each entry is a dotted `"source_step.field"` reference; this module
//! parses every step's `connections` once up front into a step-indexed
//! map of `target_field -> (source_step, source_field)` for
//! `InputResolver` to consult at run time.

use std::collections::HashMap;

use crate::step_config::StepConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSource {
    pub source_step: String,
    pub source_field: String,
}

/// `step_name -> (target_field -> source)`.
pub type ConnectionMap = HashMap<String, HashMap<String, ConnectionSource>>;

pub fn resolve_connections(steps: &[StepConfig]) -> ConnectionMap {
    let mut out = ConnectionMap::new();
    for step in steps {
        let mut per_step = HashMap::new();
        for (target_field, source) in &step.connections {
            if let Some((source_step, source_field)) = source.split_once('.') {
                per_step.insert(
                    target_field.clone(),
                    ConnectionSource {
                        source_step: source_step.to_string(),
                        source_field: source_field.to_string(),
                    },
                );
            }
        }
        out.insert(step.name.clone(), per_step);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_config::StepConfig;
    use std::collections::HashMap;

    #[test]
    fn parses_dotted_source() {
        let mut connections = HashMap::new();
        connections.insert("text".to_string(), "A.out".to_string());
        let step = StepConfig {
            name: "b".into(),
            connections,
            ..Default::default()
        };
        let map = resolve_connections(&[step]);
        let source = &map["b"]["text"];
        assert_eq!(source.source_step, "A");
        assert_eq!(source.source_field, "out");
    }
}
