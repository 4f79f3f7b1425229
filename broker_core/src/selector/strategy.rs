use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::OnceLock;

/// How a downstream service reaches its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// No SSH hop, connect to host:port as-is.
    Direct,
    /// Open one SSH channel per downstream connection, no local listener.
    ChannelDial,
    /// The driver insists on raw sockets: run a local forwarding tunnel and
    /// point the driver at `127.0.0.1:<local port>`.
    LocalForward,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct"),
            Strategy::ChannelDial => write!(f, "channel-dial"),
            Strategy::LocalForward => write!(f, "local-forward"),
        }
    }
}

/// What an engine's driver can do when an SSH hop is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshSupport {
    /// The driver accepts a custom dialer backed by SSH channels.
    ChannelDialer,
    /// The driver opens its own sockets.
    RawSocketOnly,
}

/// Static mapping engine identifier -> SSH capability.
///
/// Built once and consulted by the selector; teaching the broker about a new
/// engine only means adding a row here.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    engines: HashMap<String, SshSupport>,
    fallback: SshSupport,
}

impl StrategyTable {
    pub fn new(fallback: SshSupport) -> Self {
        Self {
            engines: HashMap::new(),
            fallback,
        }
    }

    pub fn with_engine(mut self, engine: &str, support: SshSupport) -> Self {
        self.engines.insert(engine.to_ascii_lowercase(), support);
        self
    }

    /// The process-wide table of engines known to the broker.
    pub fn builtin() -> &'static StrategyTable {
        static TABLE: OnceLock<StrategyTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            use SshSupport::*;
            StrategyTable::new(ChannelDialer)
                .with_engine("mysql", ChannelDialer)
                .with_engine("postgresql", ChannelDialer)
                .with_engine("postgres", ChannelDialer)
                .with_engine("pg", ChannelDialer)
                .with_engine("sqlite", ChannelDialer)
                .with_engine("kingbase", ChannelDialer)
                .with_engine("opengauss", ChannelDialer)
                .with_engine("gbase", ChannelDialer)
                .with_engine("odbc", ChannelDialer)
                .with_engine("dameng", RawSocketOnly)
                .with_engine("shentong", RawSocketOnly)
                .with_engine("oracle", RawSocketOnly)
        })
    }

    pub fn support_for(&self, engine: &str) -> SshSupport {
        self.engines
            .get(&engine.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn strategy_for(&self, engine: &str, tunnelled: bool) -> Strategy {
        if !tunnelled {
            return Strategy::Direct;
        }
        match self.support_for(engine) {
            SshSupport::ChannelDialer => Strategy::ChannelDial,
            SshSupport::RawSocketOnly => Strategy::LocalForward,
        }
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::builtin().clone()
    }
}
