//! Task ledger: durable record of every task's lifecycle.
//!
//! Storage and policy are split. A [`TaskStore`] is a dumb key-value store
//! (`put` / `get` keyed by [`TaskId`]); the [`TaskLedger`] on top of it owns
//! the lifecycle rules and refuses any transition that
//! [`TaskState::can_transition_to`] does not allow.
//!
//! Only the orchestrator mutates a given task, so there is exactly one
//! writer per key and the read-check-write sequence needs no lock beyond
//! what the store uses to protect its own map.

use crate::error::Video2MdError;
use crate::task::{Stage, Task, TaskFailure, TaskId, TaskRequest, TaskState};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Key-value persistence for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn put(&self, task: &Task) -> Result<(), Video2MdError>;
    async fn get(&self, id: TaskId) -> Result<Option<Task>, Video2MdError>;
    async fn list(&self) -> Result<Vec<Task>, Video2MdError>;
}

/// In-process store. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, task: &Task) -> Result<(), Video2MdError> {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, Video2MdError> {
        Ok(self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Task>, Video2MdError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

/// One pretty-printed JSON file per task under a directory.
///
/// Writes go to `<id>.json.tmp` and are renamed into place, so a crash
/// mid-write never leaves a truncated record behind.
pub struct JsonFileTaskStore {
    dir: PathBuf,
}

impl JsonFileTaskStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Video2MdError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Video2MdError::Storage(format!("create '{}': {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn put(&self, task: &Task) -> Result<(), Video2MdError> {
        let path = self.path_for(task.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(task)
            .map_err(|e| Video2MdError::Storage(format!("serialise task {}: {e}", task.id)))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Video2MdError::Storage(format!("write '{}': {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Video2MdError::Storage(format!("rename '{}': {e}", path.display())))?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, Video2MdError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Video2MdError::Storage(format!("parse '{}': {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Video2MdError::Storage(format!(
                "read '{}': {e}",
                path.display()
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<Task>, Video2MdError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Video2MdError::Storage(format!("list '{}': {e}", self.dir.display())))?;
        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Video2MdError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<TaskId>().ok())
            else {
                continue;
            };
            if let Some(task) = self.get(id).await? {
                tasks.push(task);
            }
        }
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

/// Lifecycle-enforcing view over a [`TaskStore`].
#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn TaskStore>,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Ledger backed by a [`MemoryTaskStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTaskStore::new()))
    }

    /// Record a new `pending` task.
    pub async fn create(&self, request: TaskRequest) -> Result<Task, Video2MdError> {
        let task = Task::new(request);
        self.store.put(&task).await?;
        debug!(task_id = %task.id, "ledger: created pending task");
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, Video2MdError> {
        self.store
            .get(id)
            .await?
            .ok_or(Video2MdError::TaskNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Task>, Video2MdError> {
        self.store.list().await
    }

    /// `pending -> processing`.
    pub async fn start(&self, id: TaskId) -> Result<Task, Video2MdError> {
        self.transition(id, TaskState::Processing, |_| {}).await
    }

    /// Record the stage currently running. Only valid while `processing`.
    pub async fn set_stage(&self, id: TaskId, stage: Stage) -> Result<Task, Video2MdError> {
        let mut task = self.get(id).await?;
        if task.state != TaskState::Processing {
            return Err(Video2MdError::IllegalTransition {
                id,
                from: task.state,
                to: TaskState::Processing,
            });
        }
        task.stage = Some(stage);
        task.updated_at = Utc::now();
        self.store.put(&task).await?;
        Ok(task)
    }

    /// `processing -> completed` with the persisted document path.
    pub async fn complete(&self, id: TaskId, result: PathBuf) -> Result<Task, Video2MdError> {
        self.transition(id, TaskState::Completed, move |task| {
            task.result = Some(result);
            task.stage = None;
        })
        .await
    }

    /// `processing -> failed` with a stage-tagged payload.
    pub async fn fail(&self, id: TaskId, failure: TaskFailure) -> Result<Task, Video2MdError> {
        self.transition(id, TaskState::Failed, move |task| {
            task.error = Some(failure);
            task.stage = None;
        })
        .await
    }

    async fn transition(
        &self,
        id: TaskId,
        next: TaskState,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task, Video2MdError> {
        let mut task = self.get(id).await?;
        if !task.state.can_transition_to(next) {
            return Err(Video2MdError::IllegalTransition {
                id,
                from: task.state,
                to: next,
            });
        }
        task.state = next;
        task.updated_at = Utc::now();
        apply(&mut task);
        self.store.put(&task).await?;
        debug!(task_id = %id, state = %next, "ledger: transition");
        Ok(task)
    }
}
