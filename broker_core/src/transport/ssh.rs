use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use ssh2::{Channel, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::{BoxedStream, SshConnector, SshTransport};
use crate::config::{SshAuth, SshTarget};
use crate::errors::{BrokerError, Result};

const LIBSSH2_ERROR_EAGAIN: i32 = -37;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;
const POLL_INTERVAL: Duration = Duration::from_millis(2);
const PIPE_CAPACITY: usize = 64 * 1024;

/// Opens libssh2 sessions on the blocking pool.
#[derive(Debug, Clone)]
pub struct Ssh2Connector {
    connect_timeout: Duration,
}

impl Ssh2Connector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SshConnector for Ssh2Connector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn SshTransport>> {
        let target = target.clone();
        let connect_timeout = self.connect_timeout;
        info!("Connecting to SSH server at {}", target.address());

        let session = tokio::task::spawn_blocking(move || open_session(&target, connect_timeout))
            .await
            .map_err(|e| BrokerError::Transport(format!("ssh connect task failed: {e}")))??;

        Ok(Arc::new(session))
    }
}

fn open_session(target: &SshTarget, connect_timeout: Duration) -> Result<Ssh2Transport> {
    let addr = target
        .address()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| BrokerError::Transport(format!("cannot resolve {}", target.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
        BrokerError::Transport(format!("TCP connect to {} failed: {e}", target.address()))
    })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(connect_timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| BrokerError::Transport(format!("handshake error: {e}")))?;

    match &target.auth {
        SshAuth::Password { password } => session.userauth_password(&target.username, password)?,
        SshAuth::PublicKey {
            private_key_path,
            passphrase,
        } => session.userauth_pubkey_file(
            &target.username,
            None,
            Path::new(private_key_path),
            passphrase.as_deref(),
        )?,
        SshAuth::Agent => session.userauth_agent(&target.username)?,
    }
    if !session.authenticated() {
        return Err(BrokerError::Transport(format!(
            "authentication failed for {}@{}",
            target.username,
            target.address()
        )));
    }

    session.set_keepalive(true, 15);
    // Channels are pumped by polling from async tasks from here on.
    session.set_blocking(false);
    info!("SSH session established to {}", target.address());

    Ok(Ssh2Transport {
        session,
        closed: AtomicBool::new(false),
        broken: Arc::new(AtomicBool::new(false)),
        peer: format!("{}@{}", target.username, target.address()),
        open_timeout: connect_timeout,
    })
}

/// One authenticated libssh2 session multiplexing `direct-tcpip` channels.
pub struct Ssh2Transport {
    session: Session,
    closed: AtomicBool,
    /// Set when the socket under the session failed.
    broken: Arc<AtomicBool>,
    peer: String,
    open_timeout: Duration,
}

impl Ssh2Transport {
    fn mark_broken(&self, reason: &str) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            warn!("SSH session to {} lost: {}", self.peer, reason);
        }
    }

    async fn open_channel(&self, host: &str, port: u16) -> Result<Channel> {
        let started = Instant::now();
        loop {
            match self.session.channel_direct_tcpip(host, port, None) {
                Ok(channel) => return Ok(channel),
                Err(e)
                    if matches!(
                        e.code(),
                        ssh2::ErrorCode::Session(code) if code == LIBSSH2_ERROR_EAGAIN
                    ) =>
                {
                    if started.elapsed() > self.open_timeout {
                        return Err(BrokerError::Transport(format!(
                            "timed out opening channel to {host}:{port}"
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => {
                    if is_socket_error(&e) {
                        self.mark_broken(&e.to_string());
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait]
impl SshTransport for Ssh2Transport {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        if !self.is_alive() {
            return Err(BrokerError::Transport(format!(
                "session to {} is closed",
                self.peer
            )));
        }
        let channel = self.open_channel(host, port).await?;
        debug!("Opened channel {} -> {}:{}", self.peer, host, port);

        let (caller_side, pump_side) = tokio::io::duplex(PIPE_CAPACITY);
        let label = format!("{host}:{port}");
        tokio::spawn(pump(channel, pump_side, label, self.broken.clone()));
        Ok(Box::new(caller_side))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Non-blocking session: a WouldBlock here just means the goodbye
        // packet was not flushed, the socket goes away with the session.
        if let Err(e) = self.session.disconnect(None, "broker closed", None) {
            debug!("SSH disconnect from {}: {}", self.peer, e);
        }
        info!("SSH session to {} closed", self.peer);
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.broken.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

fn is_socket_error(e: &ssh2::Error) -> bool {
    matches!(
        e.code(),
        ssh2::ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_DISCONNECT | LIBSSH2_ERROR_SOCKET_RECV
        )
    )
}

impl Drop for Ssh2Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shuttles bytes between a libssh2 channel and the in-process pipe.
///
/// EOF or an error on either side ends the pump, which drops both ends. A
/// channel I/O error means the session socket failed and sets `broken`.
async fn pump(mut channel: Channel, pipe: DuplexStream, label: String, broken: Arc<AtomicBool>) {
    let (mut pipe_rd, mut pipe_wr) = tokio::io::split(pipe);
    let mut up = [0u8; 16 * 1024];
    let mut down = [0u8; 16 * 1024];

    'outer: loop {
        // outgoing
        tokio::select! {
            res = pipe_rd.read(&mut up) => match res {
                Ok(0) => break 'outer,
                Ok(n) => {
                    if let Err(e) = write_channel(&mut channel, &up[..n]).await {
                        warn!("SSH channel write error on {}: {}", label, e);
                        broken.store(true, Ordering::SeqCst);
                        break 'outer;
                    }
                }
                Err(e) => {
                    debug!("Pipe read error on {}: {}", label, e);
                    break 'outer;
                }
            },
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        // incoming
        loop {
            match channel.read(&mut down) {
                Ok(0) => {
                    if channel.eof() {
                        break 'outer;
                    }
                    break;
                }
                Ok(n) => {
                    if pipe_wr.write_all(&down[..n]).await.is_err() {
                        break 'outer;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("SSH channel read error on {}: {}", label, e);
                    broken.store(true, Ordering::SeqCst);
                    break 'outer;
                }
            }
        }
    }

    let _ = channel.send_eof();
    let _ = channel.close();
    let _ = pipe_wr.shutdown().await;
    debug!("Channel pump for {} finished", label);
}

async fn write_channel(channel: &mut Channel, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
    loop {
        match channel.flush() {
            Ok(()) => return Ok(()),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}
