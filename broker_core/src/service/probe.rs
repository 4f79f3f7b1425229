use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{DatabaseService, ServiceEndpoint, ServiceFactory};
use crate::errors::Result;
use crate::transport::BoxedStream;

/// Reachability-only service: holds one open socket to the database.
///
/// Speaks no wire protocol; it proves the endpoint (direct, channel or
/// tunnel) accepts connections, which is all the `check` path needs.
pub struct ProbeService {
    endpoint: ServiceEndpoint,
    stream: Mutex<Option<BoxedStream>>,
}

impl ProbeService {
    pub async fn connect(endpoint: ServiceEndpoint) -> Result<Self> {
        let stream = endpoint.connect().await?;
        info!(
            "Probe connected to {} ({}) via {}",
            endpoint.config.address(),
            endpoint.config.engine,
            endpoint.strategy
        );
        Ok(Self {
            endpoint,
            stream: Mutex::new(Some(stream)),
        })
    }
}

#[async_trait]
impl DatabaseService for ProbeService {
    async fn info(&self) -> Result<serde_json::Value> {
        let connected = self.stream.lock().await.is_some();
        Ok(json!({
            "engine": self.endpoint.config.engine,
            "address": self.endpoint.config.address(),
            "strategy": self.endpoint.strategy.to_string(),
            "connected": connected,
        }))
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
            debug!("Probe to {} closed", self.endpoint.config.address());
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeFactory;

#[async_trait]
impl ServiceFactory for ProbeFactory {
    async fn create(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn DatabaseService>> {
        Ok(Arc::new(ProbeService::connect(endpoint.clone()).await?))
    }
}
