//! Builds the payload a plugin will see from context, connections, and
//! templated config.

use serde_json::{Map, Value};

use crate::connections::ConnectionMap;
use crate::context::Context;
use crate::errors::InputError;
use crate::step_config::StepConfig;
use crate::template::{self, TemplateScope};

pub struct InputResolver;

impl InputResolver {
    /// Resolution order per target field: explicit connection, then a
    /// context key of the same name, then the step's own `config` with
    /// template expansion applied.
    pub fn resolve(
        step: &StepConfig,
        connections: &ConnectionMap,
        context: &Context,
        required_fields: &[&str],
    ) -> Result<Value, InputError> {
        let mut out = Map::new();
        let step_connections = connections.get(&step.name);

        let mut fields: Vec<String> = step.config.keys().cloned().collect();
        if let Some(conns) = step_connections {
            for field in conns.keys() {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }

        let scope = TemplateScope {
            step_name: step.name.clone(),
            task_id: context.task_id.clone(),
            extra: Default::default(),
        };

        for field in &fields {
            let resolved = if let Some(source) = step_connections.and_then(|c| c.get(field)) {
                Self::resolve_connection(source, context)
            } else if let Some(v) = context.get(field) {
                Some(v)
            } else {
                step.config.get(field).map(|v| template::expand(v, context, &scope))
            };
            if let Some(v) = resolved {
                out.insert(field.clone(), v);
            }
        }

        for required in required_fields {
            if !out.contains_key(*required) {
                return Err(InputError::MissingRequiredField {
                    step: step.name.clone(),
                    field: required.to_string(),
                });
            }
        }

        Ok(Value::Object(out))
    }

    fn resolve_connection(
        source: &crate::connections::ConnectionSource,
        context: &Context,
    ) -> Option<Value> {
        let upstream = context.get(&source.source_step)?;
        match &upstream {
            Value::Object(map) => map.get(&source.source_field).cloned().or(Some(upstream)),
            other => Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::resolve_connections;
    use std::collections::HashMap;

    #[test]
    fn prefers_connection_over_context_key_of_same_name() {
        let ctx = Context::new("t", None);
        ctx.set("a", serde_json::json!({"out": "from-a"}));
        ctx.set("text", serde_json::json!("from-context"));

        let mut connections = HashMap::new();
        connections.insert("text".to_string(), "a.out".to_string());
        let step = StepConfig {
            name: "b".into(),
            connections,
            ..Default::default()
        };
        let map = resolve_connections(&[step.clone()]);

        let input = InputResolver::resolve(&step, &map, &ctx, &[]).unwrap();
        assert_eq!(input["text"], serde_json::json!("from-a"));
    }

    #[test]
    fn missing_required_field_is_an_input_error() {
        let ctx = Context::new("t", None);
        let step = StepConfig {
            name: "b".into(),
            ..Default::default()
        };
        let map = resolve_connections(&[step.clone()]);
        let err = InputResolver::resolve(&step, &map, &ctx, &["needed"]).unwrap_err();
        assert!(matches!(err, InputError::MissingRequiredField { .. }));
    }
}
