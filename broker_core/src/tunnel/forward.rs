use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error};
use tokio::net::TcpStream;

use crate::transport::SshTransport;

/// Relays one accepted local connection to the tunnel's fixed target.
///
/// Both copy directions run concurrently; whichever finishes first (EOF or
/// error) ends the pair and drops both sockets. Other pairs are untouched.
pub(crate) async fn forward_pair(
    local: TcpStream,
    transport: Arc<dyn SshTransport>,
    remote_host: String,
    remote_port: u16,
    active: Arc<AtomicUsize>,
) {
    let peer = local
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());

    let remote = match transport.dial(&remote_host, remote_port).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(
                "Tunnel dial {}:{} for {} failed: {}",
                remote_host, remote_port, peer, e
            );
            return;
        }
    };

    active.fetch_add(1, Ordering::SeqCst);
    debug!("Forwarding {} <-> {}:{}", peer, remote_host, remote_port);

    let (mut local_rd, mut local_wr) = local.into_split();
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    tokio::select! {
        res = tokio::io::copy(&mut local_rd, &mut remote_wr) => match res {
            Ok(n) => debug!("{} -> remote finished after {} bytes", peer, n),
            Err(e) => debug!("{} -> remote failed: {}", peer, e),
        },
        res = tokio::io::copy(&mut remote_rd, &mut local_wr) => match res {
            Ok(n) => debug!("remote -> {} finished after {} bytes", peer, n),
            Err(e) => debug!("remote -> {} failed: {}", peer, e),
        },
    }

    active.fetch_sub(1, Ordering::SeqCst);
    debug!("Connection pair for {} closed", peer);
}
