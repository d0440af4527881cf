//! Ordered middleware chain for processing artifact commands.
//!
//! `ArtifactMiddleware` holds an ordered list of named handlers and
//! runs a command through each in turn, stopping early if a handler
//! returns `None`. Logging and error translation happen once in
//! `execute` rather than being duplicated per handler.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use super::commands::ArtifactCommand;

#[derive(Debug, Error, Clone)]
#[error("{handler_name}: {message} (command: {command_id})")]
pub struct MiddlewareError {
    pub handler_name: String,
    pub command_id: String,
    pub message: String,
}

/// One stage in the artifact-write pipeline. Returning `Ok(None)`
/// terminates the chain early without error (mirrors the Python
/// protocol's "return None to terminate").
#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, command: ArtifactCommand) -> Result<Option<ArtifactCommand>, String>;
}

pub struct ArtifactMiddleware {
    handlers: Vec<Box<dyn MiddlewareHandler>>,
    lock: tokio::sync::Mutex<()>,
}

impl ArtifactMiddleware {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn use_handler(&mut self, handler: Box<dyn MiddlewareHandler>) {
        self.handlers.push(handler);
    }

    /// Runs `command` through every handler in sequence. The whole chain
    /// is serialized behind a lock, matching the Python implementation's
    /// `asyncio.Lock`, so concurrent artifact writes don't interleave
    /// directory-creation/history-append side effects.
    pub async fn execute(
        &self,
        command: ArtifactCommand,
    ) -> Result<Option<ArtifactCommand>, MiddlewareError> {
        let _guard = self.lock.lock().await;
        let mut current = Some(command);
        for handler in &self.handlers {
            let Some(cmd) = current.take() else {
                break;
            };
            let command_id = cmd.id.to_string();
            debug!(handler = handler.name(), command_id, "starting middleware handler");
            match handler.handle(cmd).await {
                Ok(next) => {
                    debug!(handler = handler.name(), command_id, "completed middleware handler");
                    current = next;
                }
                Err(message) => {
                    error!(handler = handler.name(), command_id, %message, "middleware handler failed");
                    return Err(MiddlewareError {
                        handler_name: handler.name().to_string(),
                        command_id,
                        message,
                    });
                }
            }
        }
        Ok(current)
    }
}

impl Default for ArtifactMiddleware {
    fn default() -> Self {
        Self::new()
    }
}
