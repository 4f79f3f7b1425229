//! In‑process stand‑ins for `SshConnector` / `SshTransport`.
//!
//! *  `dial` opens a plain loopback `TcpStream` to the requested host:port, as
//!    if the SSH server had forwarded it.
//! *  Every `connect` and `close` is counted so tests can assert that each
//!    session is torn down exactly once.
//! *  `FakeConnector::sever` drops a session from the "server" side without
//!    closing it, like a jump host that went away.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use broker_core::config::SshTarget;
use broker_core::errors::{BrokerError, Result};
use broker_core::transport::{BoxedStream, SshConnector, SshTransport};
use tokio::net::TcpStream;

use super::EventLog;

pub struct FakeTransport {
    target: String,
    closed: AtomicBool,
    severed: AtomicBool,
    closes: Arc<AtomicUsize>,
    dials: Arc<AtomicUsize>,
    events: EventLog,
}

#[async_trait]
impl SshTransport for FakeTransport {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        if !self.is_alive() {
            return Err(BrokerError::Transport("session closed".into()));
        }
        self.dials.fetch_add(1, Ordering::SeqCst);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| BrokerError::Transport(format!("dial {host}:{port}: {e}")))?;
        Ok(Box::new(stream))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push("transport:close".into());
        }
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.severed.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        format!("fake://{}", self.target)
    }
}

pub struct FakeConnector {
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub dials: Arc<AtomicUsize>,
    pub fail: AtomicBool,
    sessions: Mutex<Vec<Arc<FakeTransport>>>,
    events: EventLog,
}

impl FakeConnector {
    pub fn new(events: EventLog) -> Self {
        Self {
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            dials: Arc::new(AtomicUsize::new(0)),
            fail: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn failing(events: EventLog) -> Self {
        let connector = Self::new(events);
        connector.fail.store(true, Ordering::SeqCst);
        connector
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Kills the `n`-th session handed out, leaving its close to the broker.
    pub fn sever(&self, n: usize) {
        self.sessions.lock().unwrap()[n]
            .severed
            .store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn SshTransport>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport(format!(
                "authentication failed for {}",
                target.username
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(FakeTransport {
            target: target.address(),
            closed: AtomicBool::new(false),
            severed: AtomicBool::new(false),
            closes: self.closes.clone(),
            dials: self.dials.clone(),
            events: self.events.clone(),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}
