//! Execution-state persistence (spec §4.8), grounded on
//! `examples/original_source/src/workflow/state.py`'s `StateStore` /
//! `FileStateStore` / `MemoryStateStore`, and on the teacher's
//! `crates/durable/src/persistence/{store,memory}.rs` trait-plus-in-memory-impl shape.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use chapterforge_core::WorkflowExecution;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub step_count: usize,
}

impl ExecutionSummary {
    fn from_execution(execution: &WorkflowExecution) -> Self {
        Self {
            id: execution.id,
            workflow_id: execution.workflow_id,
            status: format!("{:?}", execution.status).to_lowercase(),
            start_time: execution.start_time,
            end_time: execution.end_time,
            step_count: execution.step_executions.len(),
        }
    }
}

#[derive(Default, Clone, Copy)]
pub struct ListFilter<'a> {
    pub workflow_id: Option<Uuid>,
    pub status: Option<&'a str>,
    pub limit: usize,
}

/// A worker's before/after-processing marker for one event (spec §4.2's
/// `_save_checkpoint`), used by the orchestrator's resume path to detect a
/// crash mid-processing: a checkpoint whose `phase` is still `"started"`
/// means the matching `"completed"`/`"failed"` checkpoint never landed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: Uuid,
    pub phase: String,
    pub data: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Persists and restores `WorkflowExecution` snapshots across restarts so the
/// orchestrator can resume an in-flight execution (spec §4.8/§4.9).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<WorkflowExecution>, StoreError>;
    async fn delete_execution(&self, execution_id: Uuid) -> Result<bool, StoreError>;
    async fn list_executions(&self, filter: ListFilter<'_>) -> Result<Vec<ExecutionSummary>, StoreError>;

    /// Remove executions whose `start_time` is older than `days` days. Returns the count removed.
    async fn cleanup_older_than(&self, days: i64) -> Result<usize, StoreError>;

    async fn save_checkpoint(
        &self,
        workflow_id: Uuid,
        phase: &str,
        data: serde_json::Value,
    ) -> Result<(), StoreError>;
    async fn latest_checkpoint(&self, workflow_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;
}

/// In-process store, used by tests and by `chapterforge run --mode dry-run`.
#[derive(Default)]
pub struct InMemoryStateStore {
    executions: RwLock<HashMap<Uuid, WorkflowExecution>>,
    checkpoints: RwLock<HashMap<Uuid, Vec<Checkpoint>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.executions.read().await.get(&execution_id).cloned())
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.executions.write().await.remove(&execution_id).is_some())
    }

    async fn list_executions(&self, filter: ListFilter<'_>) -> Result<Vec<ExecutionSummary>, StoreError> {
        let executions = self.executions.read().await;
        let mut summaries: Vec<ExecutionSummary> = executions
            .values()
            .filter(|e| filter.workflow_id.map_or(true, |wf| e.workflow_id == wf))
            .filter(|e| {
                filter
                    .status
                    .map_or(true, |s| format!("{:?}", e.status).to_lowercase() == s)
            })
            .map(ExecutionSummary::from_execution)
            .collect();
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if filter.limit > 0 {
            summaries.truncate(filter.limit);
        }
        Ok(summaries)
    }

    async fn cleanup_older_than(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, e| e.start_time.map_or(true, |t| t >= cutoff));
        Ok(before - executions.len())
    }

    async fn save_checkpoint(
        &self,
        workflow_id: Uuid,
        phase: &str,
        data: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.checkpoints
            .write()
            .await
            .entry(workflow_id)
            .or_default()
            .push(Checkpoint {
                workflow_id,
                phase: phase.to_string(),
                data,
                recorded_at: Utc::now(),
            });
        Ok(())
    }

    async fn latest_checkpoint(&self, workflow_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&workflow_id)
            .and_then(|list| list.last().cloned()))
    }
}

/// One JSON file per execution under `<base_path>/executions/<id>.json`,
/// written atomically via write-to-temp-then-rename so a crash mid-write
/// never leaves a corrupt snapshot (spec §4.8/§4.9 crash-resume scenario).
pub struct FileStateStore {
    executions_path: PathBuf,
    checkpoints_path: PathBuf,
}

impl FileStateStore {
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let executions_path = base_path.as_ref().join("executions");
        let checkpoints_path = base_path.as_ref().join("checkpoints");
        tokio::fs::create_dir_all(&executions_path).await?;
        tokio::fs::create_dir_all(&checkpoints_path).await?;
        Ok(Self {
            executions_path,
            checkpoints_path,
        })
    }

    fn execution_file(&self, execution_id: Uuid) -> PathBuf {
        self.executions_path.join(format!("{execution_id}.json"))
    }

    fn checkpoint_file(&self, workflow_id: Uuid) -> PathBuf {
        self.checkpoints_path.join(format!("{workflow_id}.jsonl"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let path = self.execution_file(execution.id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(execution)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        let path = self.execution_file(execution_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<bool, StoreError> {
        let path = self.execution_file(execution_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_executions(&self, filter: ListFilter<'_>) -> Result<Vec<ExecutionSummary>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.executions_path).await?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            let execution: WorkflowExecution = match serde_json::from_slice(&bytes) {
                Ok(e) => e,
                Err(_) => continue,
            };

            if filter.workflow_id.map_or(false, |wf| execution.workflow_id != wf) {
                continue;
            }
            let status = format!("{:?}", execution.status).to_lowercase();
            if filter.status.map_or(false, |s| status != s) {
                continue;
            }

            summaries.push(ExecutionSummary::from_execution(&execution));
        }

        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if filter.limit > 0 {
            summaries.truncate(filter.limit);
        }
        Ok(summaries)
    }

    async fn cleanup_older_than(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut entries = tokio::fs::read_dir(&self.executions_path).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let Ok(execution) = serde_json::from_slice::<WorkflowExecution>(&bytes) else {
                continue;
            };
            if execution.start_time.map_or(true, |t| t < cutoff) {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn save_checkpoint(
        &self,
        workflow_id: Uuid,
        phase: &str,
        data: serde_json::Value,
    ) -> Result<(), StoreError> {
        let checkpoint = Checkpoint {
            workflow_id,
            phase: phase.to_string(),
            data,
            recorded_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&checkpoint)?;
        line.push('\n');

        let path = self.checkpoint_file(workflow_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes()).await?;
        Ok(())
    }

    async fn latest_checkpoint(&self, workflow_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.checkpoint_file(workflow_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        let last_line = text.lines().last();
        match last_line {
            Some(line) if !line.trim().is_empty() => Ok(Some(serde_json::from_str(line)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapterforge_core::ExecutionMode;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(Uuid::now_v7(), ExecutionMode::Sync)
    }

    #[tokio::test]
    async fn in_memory_round_trips() {
        let store = InMemoryStateStore::new();
        let exec = execution();
        store.save_execution(&exec).await.unwrap();
        let loaded = store.load_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, exec.id);
    }

    #[tokio::test]
    async fn in_memory_delete_is_reported() {
        let store = InMemoryStateStore::new();
        let exec = execution();
        store.save_execution(&exec).await.unwrap();
        assert!(store.delete_execution(exec.id).await.unwrap());
        assert!(!store.delete_execution(exec.id).await.unwrap());
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let exec = execution();

        {
            let store = FileStateStore::new(dir.path()).await.unwrap();
            store.save_execution(&exec).await.unwrap();
        }

        let store = FileStateStore::new(dir.path()).await.unwrap();
        let loaded = store.load_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow_id, exec.workflow_id);
    }

    #[tokio::test]
    async fn file_store_missing_execution_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();
        assert!(store.load_execution(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_list_filters_by_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();
        let a = execution();
        let b = execution();
        store.save_execution(&a).await.unwrap();
        store.save_execution(&b).await.unwrap();

        let filtered = store
            .list_executions(ListFilter {
                workflow_id: Some(a.workflow_id),
                status: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, a.id);
    }

    #[tokio::test]
    async fn in_memory_latest_checkpoint_reflects_last_save() {
        let store = InMemoryStateStore::new();
        let wf = Uuid::now_v7();
        store
            .save_checkpoint(wf, "started", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        store
            .save_checkpoint(wf, "completed", serde_json::json!({"n": 2}))
            .await
            .unwrap();

        let checkpoint = store.latest_checkpoint(wf).await.unwrap().unwrap();
        assert_eq!(checkpoint.phase, "completed");
    }

    #[tokio::test]
    async fn file_store_checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();
        let wf = Uuid::now_v7();

        assert!(store.latest_checkpoint(wf).await.unwrap().is_none());

        store
            .save_checkpoint(wf, "started", serde_json::json!({"worker": "parser"}))
            .await
            .unwrap();
        let checkpoint = store.latest_checkpoint(wf).await.unwrap().unwrap();
        assert_eq!(checkpoint.phase, "started");
        assert_eq!(checkpoint.workflow_id, wf);
    }

    #[tokio::test]
    async fn in_memory_cleanup_removes_old_executions() {
        let store = InMemoryStateStore::new();
        let mut old = execution();
        old.start_time = Some(Utc::now() - chrono::Duration::days(40));
        store.save_execution(&old).await.unwrap();

        let mut recent = execution();
        recent.start_time = Some(Utc::now());
        store.save_execution(&recent).await.unwrap();

        let removed = store.cleanup_older_than(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load_execution(old.id).await.unwrap().is_none());
        assert!(store.load_execution(recent.id).await.unwrap().is_some());
    }
}
