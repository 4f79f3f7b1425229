// tests/hw_ssh.rs
#![cfg(all(feature = "hw-tests", feature = "ssh"))]

//! Runs against a real sshd. Point it at one with
//! `BROKER_SSH_HOST`, `BROKER_SSH_USER`, `BROKER_SSH_PASSWORD` (and optionally
//! `BROKER_SSH_PORT`), then `cargo test --features hw-tests -- --nocapture`.

use std::env;
use std::sync::Arc;

use broker_core::transport::ssh::Ssh2Connector;
use broker_core::{SshTarget, Tunnel};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

fn target_from_env() -> anyhow::Result<SshTarget> {
    Ok(SshTarget::with_password(
        env::var("BROKER_SSH_HOST")?,
        env::var("BROKER_SSH_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(22),
        env::var("BROKER_SSH_USER")?,
        env::var("BROKER_SSH_PASSWORD")?,
    ))
}

#[tokio::test]
async fn tunnel_reaches_the_ssh_servers_own_sshd() -> anyhow::Result<()> {
    //   Logs will appear only when you run with `-- --nocapture`
    //   or when the test fails.
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();

    let connector = Arc::new(Ssh2Connector::new(Duration::from_secs(10)));
    let tunnel = Tunnel::new(connector, target_from_env()?, "127.0.0.1", 22);
    let port = tunnel.start().await?;

    // Whatever sits behind port 22 greets us with its version banner.
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let mut banner = [0u8; 4];
    timeout(Duration::from_secs(5), stream.read_exact(&mut banner)).await??;
    assert_eq!(&banner, b"SSH-");

    stream.write_all(b"SSH-2.0-broker-hw-test\r\n").await?;
    drop(stream);

    tunnel.close();
    assert!(!tunnel.is_alive());
    Ok(())
}
