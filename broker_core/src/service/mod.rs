//! The downstream database service as the broker sees it: an opaque handle
//! that can describe itself and be closed.

pub mod probe;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::ConnectionConfig;
use crate::errors::{BrokerError, Result};
use crate::selector::Strategy;
use crate::transport::{BoxedStream, SshTransport};

/// A live database client owned by the broker's cache.
///
/// Implementations must tolerate `close` being called more than once and
/// concurrent use from many callers.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Engine / server facts for the caller.
    async fn info(&self) -> Result<serde_json::Value>;

    async fn close(&self);
}

/// Where and how a factory should connect.
///
/// `config` is the broker's private copy: for local forwarding it already
/// points at the tunnel's `127.0.0.1` port. `dialer` is only set for channel
/// dialing, in which case every downstream socket must be opened through it.
#[derive(Clone)]
pub struct ServiceEndpoint {
    pub config: ConnectionConfig,
    pub strategy: Strategy,
    pub dialer: Option<Arc<dyn SshTransport>>,
}

impl ServiceEndpoint {
    pub fn direct(config: ConnectionConfig, strategy: Strategy) -> Self {
        Self {
            config,
            strategy,
            dialer: None,
        }
    }

    pub fn over_channel(config: ConnectionConfig, dialer: Arc<dyn SshTransport>) -> Self {
        Self {
            config,
            strategy: Strategy::ChannelDial,
            dialer: Some(dialer),
        }
    }

    /// Opens one socket to the database, through the dialer when present.
    pub async fn connect(&self) -> Result<BoxedStream> {
        match &self.dialer {
            Some(dialer) => dialer.dial(&self.config.host, self.config.port).await,
            None => {
                let stream = TcpStream::connect(self.config.address())
                    .await
                    .map_err(|e| {
                        BrokerError::ServiceConstructionFailed(format!(
                            "connect to {} failed: {e}",
                            self.config.address()
                        ))
                    })?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("engine", &self.config.engine)
            .field("address", &self.config.address())
            .field("strategy", &self.strategy)
            .field("dialer", &self.dialer.as_ref().map(|d| d.describe()))
            .finish()
    }
}

/// Builds downstream services. Called at most once per fingerprint at a time.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn create(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn DatabaseService>>;
}
