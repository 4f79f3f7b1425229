//! Local port forwarding over one SSH session.
//!
//! A [`Tunnel`] binds `127.0.0.1:0`, and for every accepted connection opens
//! a channel to one fixed remote endpoint through the SSH transport. It exists
//! for drivers that insist on opening their own sockets.

mod forward;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::config::SshTarget;
use crate::errors::{BrokerError, Result};
use crate::transport::{SshConnector, SshTransport};

pub const LOCAL_BIND_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Created,
    Starting,
    Started,
    /// Terminal.
    Closed,
}

struct TunnelInner {
    state: TunnelState,
    local_port: Option<u16>,
    transport: Option<Arc<dyn SshTransport>>,
    /// Dropping or firing this closes the listener.
    stop_tx: Option<oneshot::Sender<()>>,
}

pub struct Tunnel {
    connector: Arc<dyn SshConnector>,
    target: SshTarget,
    remote_host: String,
    remote_port: u16,
    inner: Mutex<TunnelInner>,
    dead: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Tunnel {
    pub fn new(
        connector: Arc<dyn SshConnector>,
        target: SshTarget,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            connector,
            target,
            remote_host: remote_host.into(),
            remote_port,
            inner: Mutex::new(TunnelInner {
                state: TunnelState::Created,
                local_port: None,
                transport: None,
                stop_tx: None,
            }),
            dead: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TunnelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the SSH session, binds an ephemeral local port and spawns the
    /// accept loop.
    ///
    /// Only valid once, from `Created`. Every failure path releases whatever
    /// was opened before returning.
    pub async fn start(&self) -> Result<u16> {
        {
            let mut inner = self.lock();
            match inner.state {
                TunnelState::Created => inner.state = TunnelState::Starting,
                TunnelState::Closed => {
                    return Err(BrokerError::TunnelStartFailed("tunnel is closed".into()))
                }
                TunnelState::Starting | TunnelState::Started => {
                    return Err(BrokerError::TunnelStartFailed(
                        "tunnel already started".into(),
                    ))
                }
            }
        }

        let transport = match self.connector.connect(&self.target).await {
            Ok(t) => t,
            Err(e) => {
                self.lock().state = TunnelState::Closed;
                return Err(BrokerError::TunnelStartFailed(format!(
                    "failed to create ssh client: {e}"
                )));
            }
        };

        let listener = match TcpListener::bind((LOCAL_BIND_HOST, 0)).await {
            Ok(l) => l,
            Err(e) => {
                transport.close();
                self.lock().state = TunnelState::Closed;
                return Err(BrokerError::TunnelStartFailed(format!(
                    "failed to listen on local port: {e}"
                )));
            }
        };
        let local_port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                transport.close();
                self.lock().state = TunnelState::Closed;
                return Err(BrokerError::TunnelStartFailed(format!(
                    "failed to read local address: {e}"
                )));
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            if inner.state == TunnelState::Closed {
                // close() ran while we were dialing
                transport.close();
                return Err(BrokerError::TunnelStartFailed(
                    "tunnel closed during start".into(),
                ));
            }
            inner.state = TunnelState::Started;
            inner.local_port = Some(local_port);
            inner.transport = Some(transport.clone());
            inner.stop_tx = Some(stop_tx);
        }

        tokio::spawn(accept_loop(
            listener,
            stop_rx,
            transport,
            self.remote_host.clone(),
            self.remote_port,
            self.dead.clone(),
            self.active.clone(),
        ));

        info!(
            "SSH tunnel created: {}:{} -> {} -> {}",
            LOCAL_BIND_HOST,
            local_port,
            self.target.address(),
            self.remote_addr()
        );
        Ok(local_port)
    }

    /// Closes the listener and the SSH session. Safe to call any number of
    /// times; in-flight pairs drain on their own.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == TunnelState::Closed {
            return;
        }
        inner.state = TunnelState::Closed;
        if let Some(stop) = inner.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
        debug!("SSH tunnel to {} closed", self.remote_addr());
    }

    pub fn state(&self) -> TunnelState {
        self.lock().state
    }

    pub fn local_port(&self) -> Option<u16> {
        self.lock().local_port
    }

    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    /// Started, the accept loop has not died and the SSH session is up.
    pub fn is_alive(&self) -> bool {
        let inner = self.lock();
        inner.state == TunnelState::Started
            && !self.dead.load(Ordering::SeqCst)
            && inner.transport.as_ref().is_some_and(|t| t.is_alive())
    }

    pub fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(BrokerError::TunnelDead(self.remote_addr()))
        }
    }

    /// Connection pairs currently being forwarded.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("ssh", &self.target.address())
            .field("remote", &self.remote_addr())
            .field("state", &self.state())
            .field("local_port", &self.local_port())
            .finish()
    }
}

/// Source of local connections for the accept loop.
#[async_trait]
trait Acceptor: Send {
    async fn next_conn(&mut self) -> io::Result<TcpStream>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn next_conn(&mut self) -> io::Result<TcpStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

async fn accept_loop<A: Acceptor>(
    mut listener: A,
    mut stop_rx: oneshot::Receiver<()>,
    transport: Arc<dyn SshTransport>,
    remote_host: String,
    remote_port: u16,
    dead: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                debug!("Tunnel listener for {}:{} closed", remote_host, remote_port);
                break;
            }
            res = listener.next_conn() => match res {
                Ok(local) => {
                    tokio::spawn(forward::forward_pair(
                        local,
                        transport.clone(),
                        remote_host.clone(),
                        remote_port,
                        active.clone(),
                    ));
                }
                Err(e) => {
                    error!("SSH tunnel accept error: {}", e);
                    dead.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
}
