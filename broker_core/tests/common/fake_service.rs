//! A counting `ServiceFactory` / `DatabaseService` pair.
//!
//! The factory records every endpoint it was handed, can be told to fail or
//! to take a while, and can optionally open a socket through the endpoint to
//! prove the hop in front of it works.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use broker_core::errors::{BrokerError, Result};
use broker_core::service::{DatabaseService, ServiceEndpoint, ServiceFactory};
use broker_core::transport::BoxedStream;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::EventLog;

pub struct FakeService {
    pub id: usize,
    address: String,
    stream: tokio::sync::Mutex<Option<BoxedStream>>,
    closes: Arc<AtomicUsize>,
    events: EventLog,
}

impl FakeService {
    /// Sends `payload` over the service's socket and reads the echo back.
    pub async fn echo(&self, payload: &[u8]) -> Vec<u8> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().expect("service was built with a socket");
        stream.write_all(payload).await.expect("write to echo");
        let mut back = vec![0u8; payload.len()];
        stream.read_exact(&mut back).await.expect("read echo");
        back
    }
}

#[async_trait]
impl DatabaseService for FakeService {
    async fn info(&self) -> Result<serde_json::Value> {
        Ok(json!({ "id": self.id, "address": self.address }))
    }

    async fn close(&self) {
        self.stream.lock().await.take();
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("service:close:{}", self.id));
    }
}

pub struct FakeServiceFactory {
    pub creates: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
    /// Open one socket through the endpoint while building.
    pub dial: bool,
    pub endpoints: Mutex<Vec<ServiceEndpoint>>,
    built: Mutex<Vec<Arc<FakeService>>>,
    events: EventLog,
}

impl FakeServiceFactory {
    pub fn new(events: EventLog) -> Self {
        Self {
            creates: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            fail: AtomicBool::new(false),
            delay: None,
            dial: false,
            endpoints: Mutex::new(Vec::new()),
            built: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn dialing(mut self) -> Self {
        self.dial = true;
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn last_endpoint(&self) -> ServiceEndpoint {
        self.endpoints
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("factory was called")
    }

    /// The concrete service built by the `n`-th successful create.
    pub fn built(&self, n: usize) -> Arc<FakeService> {
        self.built.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl ServiceFactory for FakeServiceFactory {
    async fn create(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn DatabaseService>> {
        let id = self.creates.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::ServiceConstructionFailed(format!(
                "{} refused the login",
                endpoint.config.address()
            )));
        }

        let stream = if self.dial {
            Some(endpoint.connect().await?)
        } else {
            None
        };

        let service = Arc::new(FakeService {
            id,
            address: endpoint.config.address(),
            stream: tokio::sync::Mutex::new(stream),
            closes: self.closes.clone(),
            events: self.events.clone(),
        });
        self.built.lock().unwrap().push(service.clone());
        Ok(service as Arc<dyn DatabaseService>)
    }
}
