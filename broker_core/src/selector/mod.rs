//! Turns a request into a cache key and a connection strategy.

pub mod fingerprint;
pub mod strategy;

pub use fingerprint::Fingerprint;
pub use strategy::{SshSupport, Strategy, StrategyTable};

use crate::config::{ConnectionConfig, SshTarget};
use crate::errors::Result;

/// Outcome of selecting for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub fingerprint: Fingerprint,
    pub strategy: Strategy,
}

/// Validates the request, then derives its fingerprint and strategy.
///
/// The fingerprint always comes from the caller's config, before any tunnel
/// endpoint rewrite happens.
pub fn select(
    table: &StrategyTable,
    config: &ConnectionConfig,
    ssh: Option<&SshTarget>,
) -> Result<Selection> {
    config.validate()?;
    Ok(Selection {
        fingerprint: Fingerprint::compute(config, ssh),
        strategy: table.strategy_for(&config.engine, ssh.is_some()),
    })
}
