use thiserror::Error;

/// Result alias used across the broker.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// A central error enum for the broker.
///
/// Every variant carries plain strings so the error is `Clone`: a failed
/// single-flight construction hands the very same error to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// A required identity field is missing from the connection config.
    #[error("Invalid connection config: {0}")]
    ConfigInvalid(String),

    /// Local listener bind or SSH dial failed while starting a tunnel.
    #[error("Tunnel start failed: {0}")]
    TunnelStartFailed(String),

    /// The downstream service factory returned an error.
    #[error("Service construction failed: {0}")]
    ServiceConstructionFailed(String),

    /// The forwarding loop of a tunnel terminated unexpectedly.
    #[error("Tunnel to {0} is dead")]
    TunnelDead(String),

    /// Benign: the job subsystem no longer knows this task.
    #[error("No task with id '{0}'")]
    TaskNotFound(String),

    /// SSH handshake, authentication or channel errors.
    #[error("SSH transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(String),

    /// The broker settings file could not be read or parsed.
    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> BrokerError {
        BrokerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Settings(err.to_string())
    }
}

#[cfg(feature = "ssh")]
impl From<ssh2::Error> for BrokerError {
    fn from(err: ssh2::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}
