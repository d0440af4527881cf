//! Concrete artifact write pipeline: validate → prepare directories →
//! write to disk → record in history.
//!
//! `ArtifactCommandHandler` chains four default handlers; `execute`
//! never raises out of the chain, converting every failure into a
//! FAILED-status command rather than propagating it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, error};

use super::commands::{ArtifactCommand, ArtifactContent, CommandStatus};
use super::middleware::{ArtifactMiddleware, MiddlewareHandler};

struct ValidateCommand;

#[async_trait]
impl MiddlewareHandler for ValidateCommand {
    fn name(&self) -> &str {
        "validate_command"
    }

    async fn handle(&self, command: ArtifactCommand) -> Result<Option<ArtifactCommand>, String> {
        if command.task_id.is_empty() || command.filename.is_empty() {
            return Err("command must have task_id and filename".to_string());
        }
        Ok(Some(command.with_status(CommandStatus::InProgress, None)))
    }
}

struct PrepareDirectories {
    base_dir: PathBuf,
}

#[async_trait]
impl MiddlewareHandler for PrepareDirectories {
    fn name(&self) -> &str {
        "prepare_directories"
    }

    async fn handle(&self, command: ArtifactCommand) -> Result<Option<ArtifactCommand>, String> {
        let mut task_dir = self.base_dir.join(&command.task_id);
        if let Some(subdir) = &command.subdir {
            task_dir = task_dir.join(subdir);
        }
        tokio::fs::create_dir_all(&task_dir)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Some(command))
    }
}

struct SaveToDisk {
    base_dir: PathBuf,
}

impl SaveToDisk {
    fn artifact_path(&self, command: &ArtifactCommand) -> PathBuf {
        self.base_dir.join(&command.task_id).join(command.relative_path())
    }
}

#[async_trait]
impl MiddlewareHandler for SaveToDisk {
    fn name(&self) -> &str {
        "save_to_disk"
    }

    async fn handle(&self, command: ArtifactCommand) -> Result<Option<ArtifactCommand>, String> {
        let path = self.artifact_path(&command);
        let result = match &command.content {
            ArtifactContent::Json(v) => {
                let body = serde_json::to_vec_pretty(v).map_err(|e| e.to_string())?;
                tokio::fs::write(&path, body).await
            }
            ArtifactContent::Text(s) => tokio::fs::write(&path, s.as_bytes()).await,
            ArtifactContent::Binary(b) => tokio::fs::write(&path, b).await,
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "wrote artifact to disk");
                Ok(Some(command.with_status(CommandStatus::Completed, None)))
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to write artifact");
                Ok(Some(command.with_status(CommandStatus::Failed, Some(e.to_string()))))
            }
        }
    }
}

struct RecordCommand {
    history: std::sync::Arc<Mutex<Vec<ArtifactCommand>>>,
}

#[async_trait]
impl MiddlewareHandler for RecordCommand {
    fn name(&self) -> &str {
        "record_command"
    }

    async fn handle(&self, command: ArtifactCommand) -> Result<Option<ArtifactCommand>, String> {
        self.history.lock().expect("history lock poisoned").push(command.clone());
        Ok(Some(command))
    }
}

/// Coordinates artifact commands through the middleware chain and keeps
/// an in-process history, mirroring `ArtifactCommandHandler`.
pub struct ArtifactCommandHandler {
    base_dir: PathBuf,
    middleware: ArtifactMiddleware,
    history: std::sync::Arc<Mutex<Vec<ArtifactCommand>>>,
}

impl ArtifactCommandHandler {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        let history = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut middleware = ArtifactMiddleware::new();
        middleware.use_handler(Box::new(ValidateCommand));
        middleware.use_handler(Box::new(PrepareDirectories {
            base_dir: base_dir.clone(),
        }));
        middleware.use_handler(Box::new(SaveToDisk {
            base_dir: base_dir.clone(),
        }));
        middleware.use_handler(Box::new(RecordCommand {
            history: history.clone(),
        }));
        Self {
            base_dir,
            middleware,
            history,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Runs `command` through the chain. Never propagates a middleware
    /// failure out: it is folded into a FAILED-status command instead,
    /// matching the Python implementation's blanket `except Exception`.
    pub async fn execute(&self, command: ArtifactCommand) -> ArtifactCommand {
        match self.middleware.execute(command.clone()).await {
            Ok(Some(result)) => result,
            Ok(None) => command.with_status(CommandStatus::Failed, Some("command execution terminated".into())),
            Err(e) => command.with_status(CommandStatus::Failed, Some(e.to_string())),
        }
    }

    pub fn task_artifacts(&self, task_id: &str) -> Vec<ArtifactCommand> {
        self.history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_json_artifact_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ArtifactCommandHandler::new(dir.path());
        let command = ArtifactCommand::new_save(
            "task-1",
            "output.json",
            ArtifactContent::Json(serde_json::json!({"a": 1})),
            None,
        );
        let result = handler.execute(command).await;
        assert_eq!(result.status, CommandStatus::Completed);

        let written = dir.path().join("task-1").join("output.json");
        assert!(written.exists());
    }

    #[tokio::test]
    async fn empty_filename_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ArtifactCommandHandler::new(dir.path());
        let command = ArtifactCommand::new_save("task-1", "", ArtifactContent::Text("x".into()), None);
        let result = handler.execute(command).await;
        assert_eq!(result.status, CommandStatus::Failed);
    }
}
