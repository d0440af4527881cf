//! `task_history.json` ledger: one record per task, guarded by an
//! inter-process file lock.
//!
//! Every read-modify-write round trip takes the `.lock` file first, and
//! a corrupted or missing history file is treated as an empty one
//! rather than a hard error, so a ledger write can never block a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::CheckpointError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgressRecord {
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub plugin: String,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub pipeline_id: String,
    pub params: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: String,
    pub artifacts: BTreeMap<String, ArtifactRecord>,
    pub step_progress: BTreeMap<String, StepProgressRecord>,
}

/// Maintains `<base_dir>/task_history.json`, guarded by
/// `<base_dir>/task_history.json.lock`.
pub struct TaskHistory {
    history_file: PathBuf,
    lock_file: PathBuf,
}

impl TaskHistory {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref();
        Self {
            history_file: base_dir.join("task_history.json"),
            lock_file: base_dir.join("task_history.json.lock"),
        }
    }

    /// Reads the whole ledger, guarded by the file lock. A corrupted or
    /// missing file is treated as an empty ledger rather than an error,
    /// matching the reference implementation.
    pub async fn read_all(&self) -> Result<BTreeMap<String, TaskRecord>, CheckpointError> {
        if let Some(parent) = self.history_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let history_file = self.history_file.clone();
        let lock_file = self.lock_file.clone();
        tokio::task::spawn_blocking(move || read_locked(&history_file, &lock_file))
            .await
            .expect("task history read task panicked")
    }

    /// Reads, applies `mutate`, and writes back — all while holding the
    /// file lock, so concurrent processes never interleave a
    /// read-modify-write.
    pub async fn update<F>(&self, mutate: F) -> Result<(), CheckpointError>
    where
        F: FnOnce(&mut BTreeMap<String, TaskRecord>) + Send + 'static,
    {
        if let Some(parent) = self.history_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let history_file = self.history_file.clone();
        let lock_file = self.lock_file.clone();
        tokio::task::spawn_blocking(move || -> Result<(), CheckpointError> {
            let lock = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_file)?;
            lock.lock_exclusive().map_err(CheckpointError::from)?;

            let mut records = read_unlocked(&history_file)?;
            mutate(&mut records);
            write_unlocked(&history_file, &records)?;

            FileExt::unlock(&lock).ok();
            Ok(())
        })
        .await
        .expect("task history update task panicked")
    }
}

fn read_locked(
    history_file: &Path,
    lock_file: &Path,
) -> Result<BTreeMap<String, TaskRecord>, CheckpointError> {
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_file)?;
    lock.lock_shared().map_err(CheckpointError::from)?;
    let result = read_unlocked(history_file);
    FileExt::unlock(&lock).ok();
    result
}

fn read_unlocked(history_file: &Path) -> Result<BTreeMap<String, TaskRecord>, CheckpointError> {
    if !history_file.exists() {
        return Ok(BTreeMap::new());
    }
    let body = std::fs::read_to_string(history_file)?;
    match serde_json::from_str(&body) {
        Ok(records) => Ok(records),
        Err(e) => {
            warn!(
                path = %history_file.display(),
                error = %e,
                "task history file is corrupted; starting from an empty ledger"
            );
            Ok(BTreeMap::new())
        }
    }
}

fn write_unlocked(
    history_file: &Path,
    records: &BTreeMap<String, TaskRecord>,
) -> Result<(), CheckpointError> {
    let body = serde_json::to_vec_pretty(records)?;
    std::fs::write(history_file, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_task_record() {
        let dir = tempfile::tempdir().unwrap();
        let history = TaskHistory::new(dir.path());

        history
            .update(|records| {
                records.insert(
                    "task-1".to_string(),
                    TaskRecord {
                        pipeline_id: "demo".to_string(),
                        params: BTreeMap::new(),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                        status: "running".to_string(),
                        artifacts: BTreeMap::new(),
                        step_progress: BTreeMap::new(),
                    },
                );
            })
            .await
            .unwrap();

        let records = history.read_all().await.unwrap();
        assert_eq!(records["task-1"].status, "running");
    }

    #[tokio::test]
    async fn corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("task_history.json"), b"not json")
            .await
            .unwrap();
        let history = TaskHistory::new(dir.path());
        let records = history.read_all().await.unwrap();
        assert!(records.is_empty());
    }
}
