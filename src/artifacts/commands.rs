//! Immutable artifact command records.
//!
//! An `ArtifactCommand` is an immutable, `Clone` record of one
//! artifact operation; `with_status` returns a new value carrying the
//! updated status rather than mutating in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOperation {
    Save,
    Delete,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Json,
    Text,
    Binary,
    Unknown,
}

/// The content a SAVE command carries, keyed to `content_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "snake_case")]
pub enum ArtifactContent {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl ArtifactContent {
    pub fn content_type(&self) -> ContentType {
        match self {
            ArtifactContent::Json(_) => ContentType::Json,
            ArtifactContent::Text(_) => ContentType::Text,
            ArtifactContent::Binary(_) => ContentType::Binary,
        }
    }
}

/// An immutable record describing one artifact operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactCommand {
    pub id: Uuid,
    pub operation: ArtifactOperation,
    pub task_id: String,
    pub filename: String,
    pub content: ArtifactContent,
    pub subdir: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub status: CommandStatus,
    pub error: Option<String>,
}

impl ArtifactCommand {
    pub fn new_save(
        task_id: impl Into<String>,
        filename: impl Into<String>,
        content: ArtifactContent,
        subdir: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: ArtifactOperation::Save,
            task_id: task_id.into(),
            filename: filename.into(),
            content,
            subdir,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
            status: CommandStatus::Pending,
            error: None,
        }
    }

    /// Returns a copy of this command with an updated status, mirroring
    /// the original's frozen-dataclass `with_status`.
    pub fn with_status(&self, status: CommandStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            ..self.clone()
        }
    }

    pub fn relative_path(&self) -> std::path::PathBuf {
        let mut p = std::path::PathBuf::new();
        if let Some(subdir) = &self.subdir {
            p.push(subdir);
        }
        p.push(&self.filename);
        p
    }
}
