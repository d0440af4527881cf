//! Small always-available plugins: a no-op for graph-shape-only tests,
//! plus the handful of demo plugins exercised in integration tests
//! (`echo`, `upper`, `fail`, `cleanup`, `ask_user`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::Context;
use crate::errors::{InputError, PluginError, SuspendInfo};
use crate::plugin::{Plugin, PluginOutcome};

/// Always succeeds with its own input, unchanged. Used where a
/// registry needs *a* plugin under a name but the test only cares
/// about graph shape.
pub struct NoopPlugin;

#[async_trait]
impl Plugin for NoopPlugin {
    fn name(&self) -> &str {
        "noop"
    }

    async fn run(&self, input: Value, _context: &Context) -> PluginOutcome {
        PluginOutcome::Success(input)
    }
}

/// Reads `msg` from its input and reports it back under `out`.
pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(&self, input: Value, _context: &Context) -> PluginOutcome {
        let msg = input.get("msg").cloned().unwrap_or(Value::Null);
        PluginOutcome::Success(json!({ "out": msg }))
    }
}

/// Reads `text` from its input and reports its upper-cased form under
/// `result`. Requires `text` to be a string.
pub struct UpperPlugin;

#[async_trait]
impl Plugin for UpperPlugin {
    fn name(&self) -> &str {
        "upper"
    }

    fn validate_requirements(&self, input: &Value) -> Result<(), InputError> {
        match input.get("text") {
            Some(Value::String(_)) => Ok(()),
            _ => Err(InputError::MissingRequiredField {
                step: "upper".to_string(),
                field: "text".to_string(),
            }),
        }
    }

    fn validate_output(&self, output: &Value) -> Result<(), PluginError> {
        match output.get("result") {
            Some(Value::String(_)) => Ok(()),
            _ => Err(PluginError::InvalidOutput {
                plugin: "upper".to_string(),
                message: "expected a string 'result' field".to_string(),
            }),
        }
    }

    async fn run(&self, input: Value, _context: &Context) -> PluginOutcome {
        let Some(Value::String(text)) = input.get("text").cloned() else {
            return PluginOutcome::InputError(InputError::MissingRequiredField {
                step: "upper".to_string(),
                field: "text".to_string(),
            });
        };
        PluginOutcome::Success(json!({ "result": text.to_uppercase() }))
    }
}

/// Always fails terminally. Used to exercise critical-failure
/// propagation and the finally phase.
pub struct FailPlugin;

#[async_trait]
impl Plugin for FailPlugin {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, _input: Value, _context: &Context) -> PluginOutcome {
        PluginOutcome::PluginError(PluginError::Fatal {
            plugin: "fail".to_string(),
            message: "intentional failure".to_string(),
        })
    }
}

/// Always succeeds without side effects. Used as a `finally:` step
/// that must run regardless of how the normal phase ended.
pub struct CleanupPlugin;

#[async_trait]
impl Plugin for CleanupPlugin {
    fn name(&self) -> &str {
        "cleanup"
    }

    async fn run(&self, _input: Value, _context: &Context) -> PluginOutcome {
        PluginOutcome::Success(Value::Null)
    }
}

/// Always suspends, asking for a `name` field to be supplied through
/// resume data. Used to exercise the suspend/resume path end to end.
pub struct AskUserPlugin;

#[async_trait]
impl Plugin for AskUserPlugin {
    fn name(&self) -> &str {
        "ask_user"
    }

    async fn run(&self, _input: Value, _context: &Context) -> PluginOutcome {
        let mut data = BTreeMap::new();
        data.insert("need".to_string(), Value::from("name"));
        PluginOutcome::Suspended(SuspendInfo {
            reason: "waiting for user-supplied input".to_string(),
            data,
        })
    }
}

/// Registers every built-in demo plugin under its conventional name.
pub fn register_all(registry: &mut crate::plugin_registry::PluginRegistry) {
    registry.register("noop", std::sync::Arc::new(NoopPlugin));
    registry.register("echo", std::sync::Arc::new(EchoPlugin));
    registry.register("upper", std::sync::Arc::new(UpperPlugin));
    registry.register("fail", std::sync::Arc::new(FailPlugin));
    registry.register("cleanup", std::sync::Arc::new(CleanupPlugin));
    registry.register("ask_user", std::sync::Arc::new(AskUserPlugin));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_wraps_msg_under_out() {
        let ctx = Context::new("t", None);
        let outcome = EchoPlugin.run(json!({"msg": "hi"}), &ctx).await;
        match outcome {
            PluginOutcome::Success(v) => assert_eq!(v, json!({"out": "hi"})),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn upper_uppercases_text() {
        let ctx = Context::new("t", None);
        let outcome = UpperPlugin.run(json!({"text": "hi"}), &ctx).await;
        match outcome {
            PluginOutcome::Success(v) => assert_eq!(v, json!({"result": "HI"})),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn ask_user_always_suspends() {
        let ctx = Context::new("t", None);
        let outcome = AskUserPlugin.run(Value::Null, &ctx).await;
        assert!(matches!(outcome, PluginOutcome::Suspended(_)));
    }
}
