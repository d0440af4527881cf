//! Validates a plugin's output against its own advertised shape (if
//! any), then merges it into the context and records artifacts.

use serde_json::Value;

use crate::context::Context;
use crate::errors::PluginError;
use crate::plugin::Plugin;

pub struct OutputHandler;

impl OutputHandler {
    /// Validates `raw_output` against `plugin`'s own output contract,
    /// then merges it into `context[step_name]`, preserving its
    /// original shape. The merge is additive: existing keys in other
    /// namespaces are untouched (each step owns its own namespace, so
    /// this is really just "write one key").
    pub fn handle(
        plugin: &dyn Plugin,
        step_name: &str,
        raw_output: Value,
        context: &Context,
    ) -> Result<(), PluginError> {
        plugin.validate_output(&raw_output)?;
        context.set(step_name, raw_output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AnyOutputPlugin;
    #[async_trait]
    impl Plugin for AnyOutputPlugin {
        fn name(&self) -> &str {
            "any_output"
        }
        async fn run(&self, input: Value, _context: &Context) -> crate::plugin::PluginOutcome {
            crate::plugin::PluginOutcome::Success(input)
        }
    }

    struct TypedOutputPlugin;
    #[async_trait]
    impl Plugin for TypedOutputPlugin {
        fn name(&self) -> &str {
            "typed_output"
        }
        fn validate_output(&self, output: &Value) -> Result<(), PluginError> {
            match output.get("result") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(PluginError::InvalidOutput {
                    plugin: self.name().to_string(),
                    message: "expected a string 'result' field".to_string(),
                }),
            }
        }
        async fn run(&self, input: Value, _context: &Context) -> crate::plugin::PluginOutcome {
            crate::plugin::PluginOutcome::Success(input)
        }
    }

    #[test]
    fn merge_does_not_disturb_other_namespaces() {
        let ctx = Context::new("t", None);
        ctx.set("a", serde_json::json!({"out": "first"}));
        OutputHandler::handle(&AnyOutputPlugin, "b", serde_json::json!({"out": "second"}), &ctx).unwrap();

        assert_eq!(ctx.get("a"), Some(serde_json::json!({"out": "first"})));
        assert_eq!(ctx.get("b"), Some(serde_json::json!({"out": "second"})));
    }

    #[test]
    fn rejects_output_that_fails_the_plugins_own_validation() {
        let ctx = Context::new("t", None);
        let err = OutputHandler::handle(&TypedOutputPlugin, "b", serde_json::json!({"out": "second"}), &ctx)
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidOutput { .. }));
        assert!(ctx.get("b").is_none());
    }

    #[test]
    fn accepts_output_that_passes_the_plugins_own_validation() {
        let ctx = Context::new("t", None);
        OutputHandler::handle(&TypedOutputPlugin, "b", serde_json::json!({"result": "ok"}), &ctx).unwrap();
        assert_eq!(ctx.get("b"), Some(serde_json::json!({"result": "ok"})));
    }
}
