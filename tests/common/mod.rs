//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use filter_proxy::config::ProxyConfig;
use filter_proxy::lifecycle::Shutdown;
use filter_proxy::net::Listener;
use filter_proxy::proxy::ProxyServer;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A running proxy bound to an ephemeral loopback port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start `server` on 127.0.0.1 with an ephemeral port.
pub async fn spawn_server(server: ProxyServer) -> TestProxy {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, 64).unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (config_updates, updates_rx) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });

    TestProxy {
        addr,
        shutdown,
        config_updates,
    }
}

/// Start a proxy built from `config`.
pub async fn spawn_proxy(config: ProxyConfig) -> TestProxy {
    spawn_server(ProxyServer::new(&config).unwrap()).await
}

/// Config targeting `backend` with everything else at defaults.
pub fn config_for(backend: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.routing.upstream_hosts = vec![backend.to_string()];
    config
}

/// A loopback backend the test drives by hand.
pub struct MockBackend {
    listener: TcpListener,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// Wait for the proxy to open its backend connection.
    pub async fn accept(&self) -> TcpStream {
        let (stream, _) = tokio::time::timeout(TIMEOUT, self.listener.accept())
            .await
            .expect("proxy never connected to backend")
            .unwrap();
        stream
    }
}

/// A port with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

pub async fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
}

/// Read exactly `expected.len()` bytes and return them as a string.
pub async fn read_len(stream: &mut TcpStream, len: usize) -> String {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("timed out reading")
        .unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read until the peer closes.
pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    tokio::time::timeout(TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .expect("peer never closed")
        .unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read whatever arrives within `window`.
pub async fn read_for(stream: &mut TcpStream, window: Duration) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}
