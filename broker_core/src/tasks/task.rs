use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Extension key naming a directory the task wrote (removed recursively).
pub const EXTEND_DIR_PATH: &str = "dirPath";
/// Extension key naming an archive the task produced.
pub const EXTEND_ZIP_PATH: &str = "zipPath";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    Import,
    Export,
    Sync,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
    Stopped,
}

/// A job started through a cached service, as the job subsystem reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default)]
    pub extend: Map<String, Value>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            status: TaskStatus::Running,
            extend: Map::new(),
        }
    }

    pub fn with_extend(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extend.insert(key.to_string(), value.into());
        self
    }

    fn path_of(&self, key: &str) -> Option<PathBuf> {
        self.extend
            .get(key)
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn dir_path(&self) -> Option<PathBuf> {
        self.path_of(EXTEND_DIR_PATH)
    }

    pub fn zip_path(&self) -> Option<PathBuf> {
        self.path_of(EXTEND_ZIP_PATH)
    }
}

/// The job subsystem's task table, as far as cleanup needs it.
pub trait TaskStore: Send + Sync {
    fn get_task(&self, task_id: &str) -> Option<Task>;

    /// Forgets the task. Returns whether it existed.
    fn clear_task(&self, task_id: &str) -> bool;
}

/// In-process task table.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite a task.
    pub fn insert_task(&self, task: Task) {
        self.lock().insert(task.task_id.clone(), task);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl TaskStore for MemoryTaskStore {
    fn get_task(&self, task_id: &str) -> Option<Task> {
        self.lock().get(task_id).cloned()
    }

    fn clear_task(&self, task_id: &str) -> bool {
        self.lock().remove(task_id).is_some()
    }
}
