//! Textual template expansion for step config values.
//!
//! `{{name}}` placeholders in a config value are resolved against a
//! small, explicit set of sources. Expansion is pure textual
//! substitution — an unresolved reference yields an empty string plus a
//! warning, never a crash, and a template never executes code.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::context::Context;

/// Bindings available to template expansion beyond the context itself.
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    pub step_name: String,
    pub task_id: String,
    pub extra: BTreeMap<String, Value>,
}

/// Expands every `{{key}}` placeholder in `value`'s strings. Non-string
/// values (and map/array values, recursively) pass through unless they
/// themselves contain strings.
pub fn expand(value: &Value, context: &Context, scope: &TemplateScope) -> Value {
    match value {
        Value::String(s) => Value::String(expand_string(s, context, scope)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand(v, context, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand(v, context, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn expand_string(input: &str, context: &Context, scope: &TemplateScope) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        // Unterminated placeholder: emit literally rather
                        // than silently dropping the rest of the string.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let key = after_open[..end].trim();
                        out.push_str(&resolve(key, context, scope));
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }
    out
}

fn resolve(key: &str, context: &Context, scope: &TemplateScope) -> String {
    match key {
        "task_id" => return scope.task_id.clone(),
        "step_name" => return scope.step_name.clone(),
        _ => {}
    }
    if let Some(v) = scope.extra.get(key) {
        return value_to_string(v);
    }
    if let Some(v) = context.get(key) {
        return value_to_string(&v);
    }
    // Dotted lookup: "step.field" against context[step][field].
    if let Some((step, field)) = key.split_once('.') {
        if let Some(Value::Object(map)) = context.get(step) {
            if let Some(v) = map.get(field) {
                return value_to_string(v);
            }
        }
    }
    warn!(placeholder = key, "template placeholder did not resolve");
    String::new()
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_context_key() {
        let ctx = Context::new("t-1", None);
        ctx.set("name", Value::from("Ada"));
        let scope = TemplateScope {
            step_name: "greet".into(),
            task_id: "t-1".into(),
            extra: BTreeMap::new(),
        };
        let expanded = expand_string("hello {{name}}", &ctx, &scope);
        assert_eq!(expanded, "hello Ada");
    }

    #[test]
    fn unresolved_placeholder_becomes_empty_not_a_crash() {
        let ctx = Context::new("t-1", None);
        let scope = TemplateScope {
            step_name: "greet".into(),
            task_id: "t-1".into(),
            extra: BTreeMap::new(),
        };
        let expanded = expand_string("hello {{missing}}!", &ctx, &scope);
        assert_eq!(expanded, "hello !");
    }

    #[test]
    fn dotted_lookup_reads_upstream_field() {
        let ctx = Context::new("t-1", None);
        ctx.set("a", serde_json::json!({"out": "hi"}));
        let scope = TemplateScope {
            step_name: "b".into(),
            task_id: "t-1".into(),
            extra: BTreeMap::new(),
        };
        assert_eq!(expand_string("{{a.out}}", &ctx, &scope), "hi");
    }
}
