//! Single-flight cache of live services, each owning its network hop.

pub mod entry;
pub mod service_cache;

pub use entry::{CacheEntry, Hop, ManagedResource};
pub use service_cache::ServiceCache;
