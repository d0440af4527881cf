//! Runner configuration: the handful of knobs that control where
//! artifacts and checkpoints live and how much concurrency is allowed.
//!
//! Kept as a small hand-rolled struct rather than pulling in the
//! `config` crate: there is exactly one source (an optional YAML file)
//! plus environment overrides, which `serde_yaml` and `std::env`
//! already cover without another dependency.

use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_max_workers() -> usize {
    4
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./tag-runs")
}

fn default_log_level() -> String {
    "tiny_agent_graph=info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Where artifacts are written; falls back to `base_dir` when unset.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// `tracing_subscriber` env-filter directive, e.g. `tiny_agent_graph=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            max_workers: default_max_workers(),
            artifact_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl RunnerConfig {
    /// Loads config from `path` if given, then applies `TAG_BASE_DIR`,
    /// `TAG_MAX_WORKERS`, `TAG_ARTIFACT_DIR`, and `TAG_LOG_LEVEL`
    /// environment overrides on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => {
                let body = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&body)?
            }
            None => RunnerConfig::default(),
        };

        if let Ok(base_dir) = std::env::var("TAG_BASE_DIR") {
            config.base_dir = PathBuf::from(base_dir);
        }
        if let Ok(max_workers) = std::env::var("TAG_MAX_WORKERS") {
            config.max_workers = max_workers.parse()?;
        }
        if let Ok(artifact_dir) = std::env::var("TAG_ARTIFACT_DIR") {
            config.artifact_dir = Some(PathBuf::from(artifact_dir));
        }
        if let Ok(log_level) = std::env::var("TAG_LOG_LEVEL") {
            config.log_level = log_level;
        }

        Ok(config)
    }

    fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(|| self.base_dir.clone())
    }

    pub fn task_history(&self) -> crate::task_history::TaskHistory {
        crate::task_history::TaskHistory::new(&self.base_dir)
    }

    pub fn checkpoint_manager(&self) -> std::sync::Arc<crate::checkpoint::CheckpointManager> {
        std::sync::Arc::new(crate::checkpoint::CheckpointManager::new(&self.base_dir))
    }

    pub fn artifact_store(&self) -> crate::artifacts::store::ArtifactStore {
        crate::artifacts::store::ArtifactStore::new(self.artifact_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_a_file() {
        let config = RunnerConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.log_level, "tiny_agent_graph=info");
    }

    #[test]
    fn artifact_dir_falls_back_to_base_dir_when_unset() {
        let config = RunnerConfig {
            base_dir: PathBuf::from("/tmp/tag-base"),
            artifact_dir: None,
            ..RunnerConfig::default()
        };
        assert_eq!(config.artifact_dir(), PathBuf::from("/tmp/tag-base"));
    }

    #[test]
    fn artifact_dir_uses_override_when_set() {
        let config = RunnerConfig {
            base_dir: PathBuf::from("/tmp/tag-base"),
            artifact_dir: Some(PathBuf::from("/tmp/tag-artifacts")),
            ..RunnerConfig::default()
        };
        assert_eq!(config.artifact_dir(), PathBuf::from("/tmp/tag-artifacts"));
    }
}
