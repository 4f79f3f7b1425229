//! A loopback TCP server that writes back every byte it receives.
//!
//! Plays the part of the database behind the SSH host: fake transports dial
//! it directly, so tunnel tests exercise real sockets end to end.

use std::net::SocketAddr;

use tokio::net::TcpListener;

pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("echo server should bind");
    let addr = listener.local_addr().expect("echo server has an address");

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });

    addr
}
