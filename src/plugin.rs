//! The plugin contract and the invoker that adapts it to the scheduler.
//!
//! `Plugin` is an async `run` plus optional lifecycle hooks and input
//! validation, returning a structured `PluginOutcome` rather than a
//! bare success/failure bool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::errors::{InputError, PluginError, RetryableError, SuspendInfo};

/// The outcome classification for one plugin invocation attempt.
#[derive(Debug, Clone)]
pub enum PluginOutcome {
    Success(Value),
    InputError(InputError),
    RetryableError(RetryableError),
    PluginError(PluginError),
    Suspended(SuspendInfo),
}

/// A typed, invocable unit of work.
///
/// Implementors validate their own input shape inside `run` (or in
/// `validate_requirements`, called first) and return a `PluginOutcome`
/// rather than relying on panics or bare `Result<_, anyhow::Error>` —
/// the scheduler needs to tell "retry this" from "never retry this"
/// apart.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name, as referenced by `StepConfig::plugin`.
    fn name(&self) -> &str;

    /// Optional pre-flight check; default accepts any input. Mirrors
    /// `PluginBase.validate_requirements`, which raises before `run` is
    /// ever called.
    fn validate_requirements(&self, _input: &Value) -> Result<(), InputError> {
        Ok(())
    }

    /// Optional post-flight check on a successful `run`'s output;
    /// default accepts any shape. Implementors that advertise a typed
    /// output model should override this and return
    /// `PluginError::InvalidOutput` on a mismatch.
    fn validate_output(&self, _output: &Value) -> Result<(), PluginError> {
        Ok(())
    }

    async fn run(&self, input: Value, context: &Context) -> PluginOutcome;

    /// Lifecycle hook invoked once before the plugin's first use in a
    /// run. Default no-op.
    async fn initialize(&self) {}
}

/// Retry policy applied uniformly by the invoker.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Invokes one plugin call, retrying `RetryableError` outcomes with
/// linear back-off. A fresh context scope is spawned for each attempt so
/// a failed attempt's writes never leak into the next one.
pub struct PluginInvoker {
    pub retry_policy: RetryPolicy,
}

impl Default for PluginInvoker {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl PluginInvoker {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub async fn invoke(
        &self,
        plugin: &dyn Plugin,
        input: Value,
        context: &Context,
    ) -> PluginOutcome {
        if let Err(e) = plugin.validate_requirements(&input) {
            return PluginOutcome::InputError(e);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let attempt_scope = context.spawn_child(Default::default());
            let outcome = plugin.run(input.clone(), &attempt_scope).await;
            attempt_scope.merge_into_parent();

            match outcome {
                PluginOutcome::RetryableError(ref e) if attempt < self.retry_policy.max_retries => {
                    let delay = self.retry_policy.base_delay * attempt;
                    warn!(
                        plugin = plugin.name(),
                        attempt, ?delay, error = %e.message, "retrying after transient plugin failure"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                PluginOutcome::RetryableError(e) => {
                    debug!(plugin = plugin.name(), attempt, "retries exhausted");
                    return PluginOutcome::PluginError(PluginError::Fatal {
                        plugin: plugin.name().to_string(),
                        message: format!("retries exhausted: {}", e.message),
                    });
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyPlugin {
        fail_times: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Plugin for FlakyPlugin {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self, _input: Value, _context: &Context) -> PluginOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                PluginOutcome::RetryableError(RetryableError {
                    plugin: "flaky".into(),
                    message: "not yet".into(),
                })
            } else {
                PluginOutcome::Success(Value::from("ok"))
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_limit() {
        let plugin = FlakyPlugin {
            fail_times: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        };
        let invoker = PluginInvoker::new(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        });
        let ctx = Context::new("t", None);
        let outcome = invoker.invoke(&plugin, Value::Null, &ctx).await;
        assert!(matches!(outcome, PluginOutcome::Success(_)));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries() {
        let plugin = FlakyPlugin {
            fail_times: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        };
        let invoker = PluginInvoker::new(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        });
        let ctx = Context::new("t", None);
        let outcome = invoker.invoke(&plugin, Value::Null, &ctx).await;
        assert!(matches!(outcome, PluginOutcome::PluginError(_)));
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
    }
}
