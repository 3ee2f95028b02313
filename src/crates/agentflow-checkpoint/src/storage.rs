//! Checkpoint storage backends.
//!
//! [`CheckpointStorage`] is the persistence protocol the workflow runtime
//! saves and restores through. Two implementations ship with the crate:
//!
//! - [`InMemoryCheckpointStorage`] — a locked map, for tests and
//!   development.
//! - [`FileCheckpointStorage`] — one JSON file per checkpoint at
//!   `{root}/{checkpoint_id}.json`, written atomically via a temp file and
//!   rename. The reader tolerates unrelated files in the directory.
//!
//! Implementations must be safe to call concurrently.

use crate::checkpoint::{CheckpointId, WorkflowCheckpoint};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Storage protocol for workflow checkpoints.
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Persist a checkpoint, returning its id.
    async fn save_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<CheckpointId>;

    /// Load a checkpoint by id, or `None` when absent.
    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>>;

    /// List checkpoint ids, optionally filtered by workflow id.
    async fn list_checkpoint_ids(&self, workflow_id: Option<&str>) -> Result<Vec<CheckpointId>>;

    /// List checkpoints, optionally filtered by workflow id.
    async fn list_checkpoints(&self, workflow_id: Option<&str>)
        -> Result<Vec<WorkflowCheckpoint>>;

    /// Delete a checkpoint by id. Returns `true` if one was removed.
    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool>;
}

/// In-memory checkpoint storage for testing and development.
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<HashMap<CheckpointId, WorkflowCheckpoint>>,
}

impl InMemoryCheckpointStorage {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn save_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<CheckpointId> {
        let id = checkpoint.checkpoint_id.clone();
        self.checkpoints.lock().insert(id.clone(), checkpoint.clone());
        tracing::debug!(checkpoint_id = %id, "saved checkpoint to memory");
        Ok(id)
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>> {
        Ok(self.checkpoints.lock().get(checkpoint_id).cloned())
    }

    async fn list_checkpoint_ids(&self, workflow_id: Option<&str>) -> Result<Vec<CheckpointId>> {
        Ok(self
            .checkpoints
            .lock()
            .values()
            .filter(|cp| workflow_id.map_or(true, |id| cp.workflow_id == id))
            .map(|cp| cp.checkpoint_id.clone())
            .collect())
    }

    async fn list_checkpoints(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowCheckpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .values()
            .filter(|cp| workflow_id.map_or(true, |id| cp.workflow_id == id))
            .cloned()
            .collect())
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool> {
        let removed = self.checkpoints.lock().remove(checkpoint_id).is_some();
        if removed {
            tracing::debug!(checkpoint_id, "deleted checkpoint from memory");
        }
        Ok(removed)
    }
}

/// File-backed checkpoint storage.
///
/// Writes go to `{checkpoint_id}.json.tmp` and are renamed into place, so a
/// crashed writer never leaves a truncated checkpoint behind.
pub struct FileCheckpointStorage {
    root: PathBuf,
}

impl FileCheckpointStorage {
    /// Create a file store rooted at `root`, creating the directory if
    /// needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        tracing::info!(root = %root.display(), "initialized file checkpoint storage");
        Ok(Self { root })
    }

    /// Directory the checkpoints live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, checkpoint_id: &str) -> PathBuf {
        self.root.join(format!("{checkpoint_id}.json"))
    }

    async fn read_all(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowCheckpoint>> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<WorkflowCheckpoint>(&contents) {
                Ok(cp) => {
                    if workflow_id.map_or(true, |id| cp.workflow_id == id) {
                        checkpoints.push(cp);
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable checkpoint file");
                }
            }
        }
        Ok(checkpoints)
    }
}

#[async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn save_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<CheckpointId> {
        let path = self.file_path(&checkpoint.checkpoint_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::info!(checkpoint_id = %checkpoint.checkpoint_id, path = %path.display(), "saved checkpoint");
        Ok(checkpoint.checkpoint_id.clone())
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>> {
        let path = self.file_path(checkpoint_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let cp = serde_json::from_str(&contents)?;
                tracing::info!(checkpoint_id, path = %path.display(), "loaded checkpoint");
                Ok(Some(cp))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CheckpointError::Io(err)),
        }
    }

    async fn list_checkpoint_ids(&self, workflow_id: Option<&str>) -> Result<Vec<CheckpointId>> {
        Ok(self
            .read_all(workflow_id)
            .await?
            .into_iter()
            .map(|cp| cp.checkpoint_id)
            .collect())
    }

    async fn list_checkpoints(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowCheckpoint>> {
        self.read_all(workflow_id).await
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool> {
        let path = self.file_path(checkpoint_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(checkpoint_id, "deleted checkpoint file");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CheckpointError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(workflow_id: &str) -> WorkflowCheckpoint {
        WorkflowCheckpoint::new(workflow_id, 100).with_iteration_count(1)
    }

    #[tokio::test]
    async fn test_memory_save_load_delete() {
        let storage = InMemoryCheckpointStorage::new();
        let cp = checkpoint("wf-a");
        let id = storage.save_checkpoint(&cp).await.unwrap();

        let loaded = storage.load_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow_id, "wf-a");

        assert!(storage.delete_checkpoint(&id).await.unwrap());
        assert!(!storage.delete_checkpoint(&id).await.unwrap());
        assert!(storage.load_checkpoint(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_list_filters_by_workflow() {
        let storage = InMemoryCheckpointStorage::new();
        storage.save_checkpoint(&checkpoint("wf-a")).await.unwrap();
        storage.save_checkpoint(&checkpoint("wf-a")).await.unwrap();
        storage.save_checkpoint(&checkpoint("wf-b")).await.unwrap();

        assert_eq!(storage.list_checkpoint_ids(None).await.unwrap().len(), 3);
        assert_eq!(
            storage.list_checkpoint_ids(Some("wf-a")).await.unwrap().len(),
            2
        );
        assert_eq!(
            storage.list_checkpoints(Some("wf-b")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCheckpointStorage::new(dir.path()).unwrap();
        let cp = checkpoint("wf-file");
        let id = storage.save_checkpoint(&cp).await.unwrap();

        assert!(dir.path().join(format!("{id}.json")).exists());
        let loaded = storage.load_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, id);
        assert_eq!(loaded.iteration_count, 1);

        assert!(storage.delete_checkpoint(&id).await.unwrap());
        assert!(storage.load_checkpoint(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_skips_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCheckpointStorage::new(dir.path()).unwrap();
        storage.save_checkpoint(&checkpoint("wf-x")).await.unwrap();

        std::fs::write(dir.path().join("notes.txt"), "not a checkpoint").unwrap();
        std::fs::write(dir.path().join("junk.json"), "{ not json").unwrap();

        let listed = storage.list_checkpoints(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_id, "wf-x");
    }
}
