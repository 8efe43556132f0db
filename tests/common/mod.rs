//! In-process SOCKS5 proxy used by the integration tests. It speaks just
//! enough of RFC 1928/1929 to accept an IPv4 CONNECT, then swallows whatever
//! the client sends through the tunnel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use socks5_bench::config::RawConfig;
use socks5_bench::BenchmarkConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Select username/password instead of no-auth.
    pub require_auth: bool,
    /// RFC 1929 status returned to the client.
    pub auth_status: u8,
    /// REP field of the CONNECT reply.
    pub reply_code: u8,
    /// Accept the TCP connection and never answer.
    pub stall: bool,
    /// Complete the handshake, then never read from the tunnel.
    pub hold_tunnel: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            require_auth: false,
            auth_status: 0x00,
            reply_code: 0x00,
            stall: false,
            hold_tunnel: false,
        }
    }
}

pub struct MockProxy {
    pub addr: SocketAddr,
    /// Credentials presented by clients, in arrival order.
    pub seen_credentials: Arc<Mutex<Vec<(String, String)>>>,
    /// Tunnel bytes received across all connections.
    pub tunnel_bytes: Arc<Mutex<u64>>,
    handle: JoinHandle<()>,
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_proxy(behavior: MockBehavior) -> MockProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen_credentials = Arc::new(Mutex::new(Vec::new()));
    let tunnel_bytes = Arc::new(Mutex::new(0u64));

    let handle = {
        let seen_credentials = seen_credentials.clone();
        let tunnel_bytes = tunnel_bytes.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let behavior = behavior.clone();
                let seen_credentials = seen_credentials.clone();
                let tunnel_bytes = tunnel_bytes.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, behavior, seen_credentials, tunnel_bytes).await;
                });
            }
        })
    };

    MockProxy {
        addr,
        seen_credentials,
        tunnel_bytes,
        handle,
    }
}

async fn serve(
    mut stream: TcpStream,
    behavior: MockBehavior,
    seen_credentials: Arc<Mutex<Vec<(String, String)>>>,
    tunnel_bytes: Arc<Mutex<u64>>,
) -> std::io::Result<()> {
    if behavior.stall {
        let mut sink = [0u8; 64];
        while stream.read(&mut sink).await? > 0 {}
        return Ok(());
    }

    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    if behavior.require_auth {
        if !methods.contains(&0x02) {
            stream.write_all(&[0x05, 0xFF]).await?;
            return Ok(());
        }
        stream.write_all(&[0x05, 0x02]).await?;

        let mut ver_ulen = [0u8; 2];
        stream.read_exact(&mut ver_ulen).await?;
        let mut user = vec![0u8; ver_ulen[1] as usize];
        stream.read_exact(&mut user).await?;
        let mut plen = [0u8; 1];
        stream.read_exact(&mut plen).await?;
        let mut pass = vec![0u8; plen[0] as usize];
        stream.read_exact(&mut pass).await?;
        seen_credentials.lock().push((
            String::from_utf8_lossy(&user).into_owned(),
            String::from_utf8_lossy(&pass).into_owned(),
        ));

        stream.write_all(&[0x01, behavior.auth_status]).await?;
        if behavior.auth_status != 0x00 {
            return Ok(());
        }
    } else {
        stream.write_all(&[0x05, 0x00]).await?;
    }

    // VER CMD RSV ATYP(ipv4) ADDR PORT
    let mut request = [0u8; 10];
    stream.read_exact(&mut request).await?;
    stream
        .write_all(&[0x05, behavior.reply_code, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
        .await?;
    if behavior.reply_code != 0x00 {
        return Ok(());
    }
    if behavior.hold_tunnel {
        let _held = stream;
        std::future::pending::<()>().await;
        return Ok(());
    }

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        *tunnel_bytes.lock() += n as u64;
    }
}

/// A local port with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn bench_config(
    proxy: SocketAddr,
    concurrency: usize,
    duration_secs: u64,
    output_dir: &Path,
) -> BenchmarkConfig {
    RawConfig {
        proxy_host: proxy.ip().to_string(),
        proxy_port: proxy.port(),
        target_host: "10.0.0.1".to_string(),
        target_port: 80,
        concurrency,
        duration_secs,
        timeout_secs: 2,
        payload_size: 512,
        output_dir: output_dir.to_path_buf(),
        ..RawConfig::default()
    }
    .build()
    .unwrap()
}

pub fn with_credentials(mut config: BenchmarkConfig, username: &str, password: &str) -> BenchmarkConfig {
    config.credentials = Some(socks5_bench::Credentials {
        username: username.to_string(),
        password: password.to_string(),
    });
    config
}
