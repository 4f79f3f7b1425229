use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::task::{Task, TaskStore};
use crate::errors::BrokerError;

/// Links UI sessions ("workers") to the jobs they started so closing a
/// session can clean up after its jobs.
///
/// Purely referential: it never runs or stops a task, it only removes the
/// task's artifacts and its record once the session goes away.
pub struct WorkerRegistry {
    store: Arc<dyn TaskStore>,
    workers: Mutex<HashMap<String, Vec<String>>>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associates `task_id` with `worker_id`. Adding twice is a no-op.
    pub fn add_task(&self, worker_id: &str, task_id: &str) {
        let mut workers = self.lock();
        let tasks = workers.entry(worker_id.to_string()).or_default();
        if !tasks.iter().any(|t| t == task_id) {
            tasks.push(task_id.to_string());
            debug!("Worker {} now tracks task {}", worker_id, task_id);
        }
    }

    pub fn worker_tasks(&self, worker_id: &str) -> Vec<String> {
        self.lock().get(worker_id).cloned().unwrap_or_default()
    }

    pub fn worker_count(&self) -> usize {
        self.lock().len()
    }

    /// Cleans every task of `worker_id` and drops the association.
    ///
    /// Never fails: unknown workers, unknown tasks and already deleted
    /// artifacts are all fine. Returns how many tasks were cleared.
    pub fn remove_worker_tasks(&self, worker_id: &str) -> usize {
        let task_ids = self.lock().remove(worker_id).unwrap_or_default();
        let cleared = task_ids
            .iter()
            .filter(|task_id| self.clean_task(task_id))
            .count();
        if !task_ids.is_empty() {
            info!(
                "Worker {} closed, cleared {}/{} task(s)",
                worker_id,
                cleared,
                task_ids.len()
            );
        }
        cleared
    }

    /// Removes one task's artifacts and record. Returns whether the task was
    /// known to the store.
    pub fn clean_task(&self, task_id: &str) -> bool {
        match self.store.get_task(task_id) {
            Some(task) => {
                remove_artifacts(&task);
                self.store.clear_task(task_id);
                true
            }
            None => {
                debug!("{}", BrokerError::TaskNotFound(task_id.to_string()));
                false
            }
        }
    }

    /// Cleans up after every worker. Used at shutdown.
    pub fn remove_all(&self) -> usize {
        let worker_ids: Vec<String> = self.lock().keys().cloned().collect();
        worker_ids
            .iter()
            .map(|worker_id| self.remove_worker_tasks(worker_id))
            .sum()
    }
}

fn remove_artifacts(task: &Task) {
    if let Some(dir) = task.dir_path() {
        log_removal(&dir, fs::remove_dir_all(&dir));
    }
    if let Some(zip) = task.zip_path() {
        log_removal(&zip, fs::remove_file(&zip));
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed task artifact {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove task artifact {:?}: {}", path, e),
    }
}
