use clap::{Args as ClapArgs, Parser, Subcommand};
use log::info;

use broker_core::{
    selector, BrokerError, ConnectionConfig, SshAuth, SshTarget, StrategyTable,
};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "dbbroker", version, subcommand_required = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the cache key and connection strategy for a request
    Fingerprint {
        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        ssh: SshArgs,
    },
    /// Build a reachability probe through the broker and print what it saw
    Check {
        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        ssh: SshArgs,
    },
    /// Forward a local port to host:port behind an SSH server until Ctrl+C
    Tunnel {
        /// Target host as seen from the SSH server
        #[arg(long)]
        host: String,
        /// Target port as seen from the SSH server
        #[arg(long)]
        port: u16,
        #[command(flatten)]
        ssh: SshArgs,
    },
}

#[derive(ClapArgs, Debug)]
pub struct DbArgs {
    /// Engine identifier (pg, mysql, oracle, dameng, ...)
    #[arg(long)]
    pub engine: String,
    /// Database host
    #[arg(long, default_value = "")]
    pub host: String,
    /// Database port
    #[arg(long, default_value_t = 0)]
    pub port: u16,
    /// Database / schema name
    #[arg(long, default_value = "")]
    pub database: String,
    /// Database file, for file based engines
    #[arg(long, default_value = "")]
    pub path: String,
    #[arg(long, default_value = "")]
    pub user: String,
    #[arg(long, default_value = "")]
    pub password: String,
}

impl DbArgs {
    fn to_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.engine, &self.host, self.port)
            .with_database(&self.database)
            .with_credentials(&self.user, &self.password);
        config.database_path = self.path.clone();
        config
    }
}

#[derive(ClapArgs, Debug)]
pub struct SshArgs {
    /// SSH server to hop through; no hop when omitted
    #[arg(long)]
    pub ssh_host: Option<String>,
    /// SSH server port (default 22)
    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,
    /// Username for SSH authentication
    #[arg(long, default_value = "")]
    pub ssh_user: String,
    /// Password for SSH authentication
    #[arg(long)]
    pub ssh_password: Option<String>,
    /// Private key file; the ssh-agent is used when neither key nor password is given
    #[arg(long)]
    pub ssh_key: Option<String>,
}

impl SshArgs {
    fn to_target(&self) -> Option<SshTarget> {
        let host = self.ssh_host.clone()?;
        let auth = match (&self.ssh_password, &self.ssh_key) {
            (Some(password), _) => SshAuth::Password {
                password: password.clone(),
            },
            (None, Some(key)) => SshAuth::PublicKey {
                private_key_path: key.clone(),
                passphrase: None,
            },
            (None, None) => SshAuth::Agent,
        };
        Some(SshTarget {
            host,
            port: self.ssh_port,
            username: self.ssh_user.clone(),
            auth,
        })
    }
}

pub async fn run_cli(args: Args) -> Result<(), BrokerError> {
    match args.command {
        Command::Fingerprint { db, ssh } => run_fingerprint(&db.to_config(), ssh.to_target()),
        Command::Check { db, ssh } => run_check(db.to_config(), ssh.to_target()).await,
        Command::Tunnel { host, port, ssh } => {
            let target = ssh.to_target().ok_or_else(|| {
                BrokerError::ConfigInvalid("tunnel needs --ssh-host".into())
            })?;
            run_tunnel(target, host, port).await
        }
    }
}

fn run_fingerprint(config: &ConnectionConfig, ssh: Option<SshTarget>) -> Result<(), BrokerError> {
    let selection = selector::select(StrategyTable::builtin(), config, ssh.as_ref())?;
    println!("fingerprint: {}", selection.fingerprint);
    println!("strategy:    {}", selection.strategy);
    Ok(())
}

#[cfg(feature = "ssh")]
async fn run_check(config: ConnectionConfig, ssh: Option<SshTarget>) -> Result<(), BrokerError> {
    use std::sync::Arc;

    use broker_core::service::probe::ProbeFactory;
    use broker_core::{Broker, BrokerSettings};

    let broker = Broker::with_ssh(BrokerSettings::load()?, Arc::new(ProbeFactory));
    info!("Checking {} ({})", config.address(), config.engine);

    let result = match broker.get_service(&config, ssh.as_ref()).await {
        Ok(service) => service.info().await,
        Err(e) => Err(e),
    };
    broker.shutdown_all().await;

    println!("{:#}", result?);
    Ok(())
}

#[cfg(not(feature = "ssh"))]
async fn run_check(_config: ConnectionConfig, _ssh: Option<SshTarget>) -> Result<(), BrokerError> {
    Err(BrokerError::Transport("dbbroker was built without ssh support".into()))
}

#[cfg(feature = "ssh")]
async fn run_tunnel(target: SshTarget, host: String, port: u16) -> Result<(), BrokerError> {
    use std::sync::Arc;

    use broker_core::transport::ssh::Ssh2Connector;
    use broker_core::{BrokerSettings, Tunnel};

    let settings = BrokerSettings::load()?;
    let connector = Arc::new(Ssh2Connector::new(settings.ssh_connect_timeout()));
    let tunnel = Tunnel::new(connector, target, host, port);
    let local_port = tunnel.start().await?;

    println!("127.0.0.1:{} -> {}", local_port, tunnel.remote_addr());
    info!("Forwarding. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!(
        "Stopping tunnel ({} connection(s) still open)",
        tunnel.active_connections()
    );
    tunnel.close();
    Ok(())
}

#[cfg(not(feature = "ssh"))]
async fn run_tunnel(_target: SshTarget, _host: String, _port: u16) -> Result<(), BrokerError> {
    Err(BrokerError::Transport("dbbroker was built without ssh support".into()))
}
