pub mod broker;
pub mod cache;
pub mod config;
pub mod errors;
pub mod selector;
pub mod service;
pub mod tasks;
pub mod transport;
pub mod tunnel;
pub mod utils;

// re‑export ergonomic entry points
pub use broker::{Broker, BrokerBuilder};
pub use cache::ServiceCache;
pub use config::{BrokerSettings, ConnectionConfig, SshAuth, SshTarget};
pub use errors::{BrokerError, Result};
pub use selector::{Fingerprint, Strategy, StrategyTable};
pub use service::{DatabaseService, ServiceEndpoint, ServiceFactory};
pub use tasks::{MemoryTaskStore, Task, TaskKind, TaskStore, WorkerRegistry};
pub use tunnel::Tunnel;
