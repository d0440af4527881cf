//! Facade over the command handler for the call sites that just want
//! "save this artifact for this task" without building a command by hand.

use std::path::PathBuf;

use super::commands::{ArtifactCommand, ArtifactContent, CommandStatus};
use super::handler::ArtifactCommandHandler;

pub struct ArtifactStore {
    handler: ArtifactCommandHandler,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            handler: ArtifactCommandHandler::new(base_dir.into()),
        }
    }

    pub async fn save(
        &self,
        task_id: &str,
        filename: &str,
        content: ArtifactContent,
        subdir: Option<String>,
    ) -> ArtifactCommand {
        let command = ArtifactCommand::new_save(task_id, filename, content, subdir);
        self.handler.execute(command).await
    }

    pub fn task_artifacts(&self, task_id: &str) -> Vec<ArtifactCommand> {
        self.handler.task_artifacts(task_id)
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.handler.base_dir().join(task_id)
    }

    pub fn is_success(command: &ArtifactCommand) -> bool {
        command.status == CommandStatus::Completed
    }
}
