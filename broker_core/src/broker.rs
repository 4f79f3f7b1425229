use std::sync::Arc;

use log::{debug, info};

use crate::cache::{ManagedResource, ServiceCache};
use crate::config::{BrokerSettings, ConnectionConfig, SshTarget};
use crate::errors::{BrokerError, Result};
use crate::selector::{self, Selection, Strategy, StrategyTable};
use crate::service::{DatabaseService, ServiceEndpoint, ServiceFactory};
use crate::transport::SshConnector;
use crate::tunnel::{Tunnel, LOCAL_BIND_HOST};

struct BrokerInner {
    settings: BrokerSettings,
    table: StrategyTable,
    cache: ServiceCache,
    connector: Arc<dyn SshConnector>,
    factory: Arc<dyn ServiceFactory>,
}

/// Process-scoped entry point: hands out cached database services, building
/// them (and their SSH hop) on first use.
///
/// Cloning is cheap; clones share one cache. Nothing is global, so tests
/// create their own broker and end it with [`Broker::shutdown_all`].
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

pub struct BrokerBuilder {
    settings: BrokerSettings,
    table: StrategyTable,
    connector: Arc<dyn SshConnector>,
    factory: Arc<dyn ServiceFactory>,
}

impl BrokerBuilder {
    pub fn settings(mut self, settings: BrokerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn strategy_table(mut self, table: StrategyTable) -> Self {
        self.table = table;
        self
    }

    pub fn build(self) -> Broker {
        Broker {
            inner: Arc::new(BrokerInner {
                cache: ServiceCache::new(self.settings.idle_ttl()),
                settings: self.settings,
                table: self.table,
                connector: self.connector,
                factory: self.factory,
            }),
        }
    }
}

impl Broker {
    pub fn builder(
        connector: Arc<dyn SshConnector>,
        factory: Arc<dyn ServiceFactory>,
    ) -> BrokerBuilder {
        BrokerBuilder {
            settings: BrokerSettings::default(),
            table: StrategyTable::default(),
            connector,
            factory,
        }
    }

    /// Broker dialing SSH hosts with libssh2.
    #[cfg(feature = "ssh")]
    pub fn with_ssh(settings: BrokerSettings, factory: Arc<dyn ServiceFactory>) -> Broker {
        let connector = Arc::new(crate::transport::ssh::Ssh2Connector::new(
            settings.ssh_connect_timeout(),
        ));
        Broker::builder(connector, factory).settings(settings).build()
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &ServiceCache {
        &self.inner.cache
    }

    /// Starts periodic idle eviction at the configured interval.
    pub fn start_sweeper(&self) {
        self.inner
            .cache
            .spawn_sweeper(self.inner.settings.sweep_interval());
    }

    pub fn select(&self, config: &ConnectionConfig, ssh: Option<&SshTarget>) -> Result<Selection> {
        selector::select(&self.inner.table, config, ssh)
    }

    /// Returns the service for this request, building it once per identity.
    pub async fn get_service(
        &self,
        config: &ConnectionConfig,
        ssh: Option<&SshTarget>,
    ) -> Result<Arc<dyn DatabaseService>> {
        let selection = self.select(config, ssh)?;
        debug!(
            "Service request {} via {}",
            selection.fingerprint.short(),
            selection.strategy
        );
        self.inner
            .cache
            .get_or_create(&selection.fingerprint, || {
                self.build(config, ssh, selection.strategy)
            })
            .await
    }

    /// Closes the cached service for this request, if any.
    pub async fn close_service(
        &self,
        config: &ConnectionConfig,
        ssh: Option<&SshTarget>,
    ) -> Result<bool> {
        let selection = self.select(config, ssh)?;
        Ok(self.inner.cache.close(&selection.fingerprint).await)
    }

    pub async fn shutdown_all(&self) -> usize {
        self.inner.cache.shutdown_all().await
    }

    pub fn cached_services(&self) -> usize {
        self.inner.cache.len()
    }

    /// The factory path. Anything opened before a failure is closed before
    /// the error is returned.
    async fn build(
        &self,
        config: &ConnectionConfig,
        ssh: Option<&SshTarget>,
        strategy: Strategy,
    ) -> Result<ManagedResource> {
        let downstream = config.clone().with_engine_defaults();

        match (strategy, ssh) {
            (Strategy::Direct, _) | (_, None) => {
                let endpoint = ServiceEndpoint::direct(downstream, Strategy::Direct);
                let service = self.create(&endpoint).await?;
                Ok(ManagedResource::direct(service))
            }
            (Strategy::ChannelDial, Some(target)) => {
                let transport = self.inner.connector.connect(target).await.map_err(|e| {
                    BrokerError::TunnelStartFailed(format!("failed to create ssh client: {e}"))
                })?;
                let endpoint = ServiceEndpoint::over_channel(downstream, transport.clone());
                match self.create(&endpoint).await {
                    Ok(service) => Ok(ManagedResource::over_channel(service, transport)),
                    Err(e) => {
                        transport.close();
                        Err(e)
                    }
                }
            }
            (Strategy::LocalForward, Some(target)) => {
                let tunnel = Tunnel::new(
                    self.inner.connector.clone(),
                    target.clone(),
                    config.host.clone(),
                    config.port,
                );
                let local_port = tunnel.start().await?;
                info!(
                    "ssh tunnel created: {} -> {}:{}",
                    config.address(),
                    LOCAL_BIND_HOST,
                    local_port
                );

                let endpoint = ServiceEndpoint::direct(
                    downstream.with_endpoint(LOCAL_BIND_HOST, local_port),
                    Strategy::LocalForward,
                );
                match self.create(&endpoint).await {
                    Ok(service) => Ok(ManagedResource::tunnelled(service, tunnel)),
                    Err(e) => {
                        tunnel.close();
                        Err(e)
                    }
                }
            }
        }
    }

    async fn create(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn DatabaseService>> {
        self.inner
            .factory
            .create(endpoint)
            .await
            .map_err(|e| match e {
                BrokerError::ServiceConstructionFailed(_) => e,
                other => BrokerError::ServiceConstructionFailed(other.to_string()),
            })
    }
}
