//! Durable checkpoint storage: atomic save, load/restore, and
//! single-resume-at-a-time exclusivity.
//!
//! A checkpoint is written via a temp file, `fsync`, then an atomic
//! rename, so a crash mid-write never leaves a half-written checkpoint
//! visible to a later load. Resume exclusivity is enforced with an
//! `fs4` advisory file lock, with a grace period after which an
//! abandoned lock is treated as stale and cleaned up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::ContextSnapshot;
use crate::dag_state::DagState;
use crate::errors::CheckpointError;

/// A serialized snapshot of one suspended run, enough to resume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub task_id: String,
    pub pipeline_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dag_state_snapshot: DagState,
    pub context_snapshot: ContextSnapshot,
    pub suspended_at_steps: Vec<String>,
    pub suspend_reasons: BTreeMap<String, String>,
    pub suspend_data: BTreeMap<String, Value>,
}

/// Resume-lock grace period: a lock file older than this is treated as
/// stale (left behind by a crashed process) and removed before a new
/// resume attempt.
const STALE_LOCK_GRACE: Duration = Duration::from_secs(60 * 10);

pub struct CheckpointManager {
    /// Root artifacts directory; checkpoints for task `t` live under
    /// `<root>/<t>/checkpoints/`.
    root: PathBuf,
}

impl CheckpointManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn checkpoints_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id).join("checkpoints")
    }

    fn resume_lock_path(&self, task_id: &str) -> PathBuf {
        self.checkpoints_dir(task_id).join(".resume.lock")
    }

    /// Serializes DAG state, context, and suspension metadata, and
    /// writes them atomically (temp file, fsync, rename).
    pub async fn create_checkpoint(
        &self,
        task_id: &str,
        pipeline_id: Option<String>,
        dag_state: &DagState,
        context_snapshot: ContextSnapshot,
        suspended_at_steps: Vec<String>,
        suspend_reasons: BTreeMap<String, String>,
        suspend_data: BTreeMap<String, Value>,
    ) -> Result<String, CheckpointError> {
        let dir = self.checkpoints_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let checkpoint_id = Uuid::new_v4().to_string();
        let checkpoint = Checkpoint {
            checkpoint_id: checkpoint_id.clone(),
            task_id: task_id.to_string(),
            pipeline_id,
            created_at: Utc::now(),
            dag_state_snapshot: dag_state.clone(),
            context_snapshot,
            suspended_at_steps,
            suspend_reasons,
            suspend_data,
        };

        let final_path = dir.join(format!("{checkpoint_id}.json"));
        let tmp_path = dir.join(format!("{checkpoint_id}.json.tmp"));
        let body = serde_json::to_vec_pretty(&checkpoint)?;

        let tmp_path_for_write = tmp_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), CheckpointError> {
            let mut file = std::fs::File::create(&tmp_path_for_write)?;
            use std::io::Write;
            file.write_all(&body)?;
            file.sync_all()?;
            Ok(())
        })
        .await
        .expect("checkpoint write task panicked")?;

        tokio::fs::rename(&tmp_path, &final_path).await?;
        info!(task_id, checkpoint_id, "wrote suspension checkpoint");
        Ok(checkpoint_id)
    }

    /// Loads a specific checkpoint, or the most recently created one for
    /// `task_id` if `checkpoint_id` is `None`.
    pub async fn load_checkpoint(
        &self,
        task_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Checkpoint, CheckpointError> {
        let dir = self.checkpoints_dir(task_id);
        let path = match checkpoint_id {
            Some(id) => dir.join(format!("{id}.json")),
            None => self.most_recent_checkpoint_path(&dir).await?,
        };
        let body = tokio::fs::read(&path)
            .await
            .map_err(|_| CheckpointError::NotFound(task_id.to_string()))?;
        let checkpoint: Checkpoint = serde_json::from_slice(&body)?;
        Ok(checkpoint)
    }

    async fn most_recent_checkpoint_path(&self, dir: &Path) -> Result<PathBuf, CheckpointError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|_| CheckpointError::NotFound(dir.display().to_string()))?;
        let mut best: Option<(SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                best = Some((modified, path));
            }
        }
        best.map(|(_, p)| p)
            .ok_or_else(|| CheckpointError::NotFound(dir.display().to_string()))
    }

    /// Restores a `DagState` from a checkpoint, reconciled against the
    /// current pipeline's step names. Rejects the restore if the
    /// checkpoint names steps no longer present in the definition.
    pub fn restore_dag_state(
        checkpoint: &Checkpoint,
        current_step_names: &[String],
    ) -> Result<DagState, CheckpointError> {
        let removed = checkpoint.dag_state_snapshot.removed_steps(current_step_names);
        if !removed.is_empty() {
            return Err(CheckpointError::RemovedSteps(removed));
        }
        let mut state = checkpoint.dag_state_snapshot.clone();
        state.reconcile_with_definition(current_step_names);
        Ok(state)
    }

    pub fn restore_context(checkpoint: &Checkpoint, context: &crate::context::Context) {
        context.restore_from_snapshot(&checkpoint.context_snapshot);
    }

    /// Removes a resume lock older than the stale-lock grace period,
    /// left behind by a process that crashed mid-resume.
    pub async fn cleanup_stale_locks(&self, task_id: &str) -> Result<(), CheckpointError> {
        let lock_path = self.resume_lock_path(task_id);
        let Ok(metadata) = tokio::fs::metadata(&lock_path).await else {
            return Ok(());
        };
        let age = metadata
            .modified()?
            .elapsed()
            .unwrap_or(Duration::ZERO);
        if age > STALE_LOCK_GRACE {
            warn!(task_id, "removing stale resume lock");
            tokio::fs::remove_file(&lock_path).await?;
        }
        Ok(())
    }

    /// Sets an exclusive resume flag for `task_id`. Fails with
    /// `ResumeInProgress` if a (non-stale) lock is already held.
    pub async fn start_resume(&self, task_id: &str) -> Result<(), CheckpointError> {
        self.cleanup_stale_locks(task_id).await?;
        let dir = self.checkpoints_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let lock_path = self.resume_lock_path(task_id);

        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), CheckpointError> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)
                .map_err(CheckpointError::from)?;
            file.try_lock_exclusive()
                .map_err(|_| CheckpointError::ResumeInProgress(task_id))?;
            Ok(())
        })
        .await
        .expect("resume-lock task panicked")
    }

    /// Clears the resume flag on successful completion.
    pub async fn complete_resume(&self, task_id: &str) -> Result<(), CheckpointError> {
        let lock_path = self.resume_lock_path(task_id);
        if tokio::fs::metadata(&lock_path).await.is_ok() {
            tokio::fs::remove_file(&lock_path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[tokio::test]
    async fn round_trips_a_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let state = DagState::new(&["a".to_string(), "b".to_string()]);
        let ctx = Context::new("task-1", None);
        ctx.set("a", serde_json::json!({"out": "hi"}));

        let id = manager
            .create_checkpoint(
                "task-1",
                None,
                &state,
                ctx.snapshot(),
                vec!["b".to_string()],
                BTreeMap::new(),
                BTreeMap::new(),
            )
            .await
            .unwrap();

        let loaded = manager.load_checkpoint("task-1", Some(&id)).await.unwrap();
        assert_eq!(loaded.suspended_at_steps, vec!["b".to_string()]);

        let restored = CheckpointManager::restore_dag_state(
            &loaded,
            &["a".to_string(), "b".to_string()],
        )
        .unwrap();
        assert_eq!(restored.status_of("a"), Some(crate::dag_state::StepStatus::Pending));
    }

    #[tokio::test]
    async fn rejects_checkpoint_naming_removed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let state = DagState::new(&["a".to_string(), "b".to_string()]);
        let ctx = Context::new("task-1", None);

        let id = manager
            .create_checkpoint(
                "task-1",
                None,
                &state,
                ctx.snapshot(),
                vec![],
                BTreeMap::new(),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        let loaded = manager.load_checkpoint("task-1", Some(&id)).await.unwrap();

        let err = CheckpointManager::restore_dag_state(&loaded, &["a".to_string()]).unwrap_err();
        assert!(matches!(err, CheckpointError::RemovedSteps(_)));
    }

    #[tokio::test]
    async fn concurrent_resume_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.start_resume("task-1").await.unwrap();
        let err = manager.start_resume("task-1").await.unwrap_err();
        assert!(matches!(err, CheckpointError::ResumeInProgress(_)));
    }
}
