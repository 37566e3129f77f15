//! Minimal local HTTP server standing in for a forward proxy or a list feed

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const EXIT_IP: &str = "203.0.113.7";

/// Target URL requested through fake proxies; the proxy answers itself.
pub const TARGET_URL: &str = "http://127.0.0.1:9/ip";

pub struct FakeServer {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    /// Answer every plain HTTP request with `status` and `body`.
    ///
    /// Connections that open with a SOCKS greeting are closed at once.
    pub async fn start(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let body = body.to_string();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, status, body.clone()));
            }
        });

        Self { addr, connections }
    }

    /// A proxy that echoes the caller's address the way httpbin does.
    pub async fn echo_proxy() -> Self {
        Self::start(200, &format!(r#"{{"origin": "{}"}}"#, EXIT_IP)).await
    }

    pub fn host_port(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, status: u16, body: String) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if request.is_empty() && matches!(buf[0], 0x04 | 0x05) {
            return;
        }
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let response = format!(
        "HTTP/1.1 {} Fake\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// A local port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
