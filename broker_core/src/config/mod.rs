pub mod connection;
pub mod settings;

pub use connection::{ConnectionConfig, SshAuth, SshTarget};
pub use settings::BrokerSettings;
