#![allow(dead_code)]

pub mod echo_server;
pub mod fake_service;
pub mod fake_transport;

use std::sync::{Arc, Mutex};

use broker_core::{Broker, BrokerSettings, ConnectionConfig, SshTarget};
use log::LevelFilter;

use fake_service::FakeServiceFactory;
use fake_transport::FakeConnector;

/// Ordered record of close calls, shared by the fakes of one test.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Logs will appear only when you run with `-- --nocapture`
/// or when the test fails.
pub fn init_test_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn broker(
    connector: &Arc<FakeConnector>,
    factory: &Arc<FakeServiceFactory>,
    settings: BrokerSettings,
) -> Broker {
    Broker::builder(connector.clone(), factory.clone())
        .settings(settings)
        .build()
}

pub fn pg_config(host: &str, port: u16) -> ConnectionConfig {
    ConnectionConfig::new("pg", host, port)
        .with_database("app")
        .with_credentials("u", "p")
}

pub fn jump_host() -> SshTarget {
    SshTarget::with_password("bastion.internal", 22, "ops", "hunter2")
}
