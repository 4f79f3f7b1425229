//! Bookkeeping between UI sessions and the jobs they started.

pub mod registry;
pub mod task;

pub use registry::WorkerRegistry;
pub use task::{MemoryTaskStore, Task, TaskKind, TaskStatus, TaskStore};
