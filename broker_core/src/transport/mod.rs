//! The SSH hop as seen by the broker: something that can open a stream to a
//! remote endpoint and be closed.

#[cfg(feature = "ssh")]
pub mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::SshTarget;
use crate::errors::Result;

/// A bidirectional byte stream handed out by a transport.
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn TunnelStream>;

/// An established SSH session.
#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Opens one logical channel to `host:port` as seen from the SSH server.
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream>;

    /// Tears the session down. Must be idempotent.
    fn close(&self);

    /// `false` once the session was closed or the peer went away.
    fn is_alive(&self) -> bool;

    /// `user@host:port`, for log lines.
    fn describe(&self) -> String;
}

/// Opens SSH sessions.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn SshTransport>>;
}
