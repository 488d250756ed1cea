//! Proxy listener and per-connection capture loop

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpSocket, TcpStream};

use super::conn::ClientConn;
use super::entry::RequestEntry;
use super::notify::ChangeNotifier;
use super::store::CaptureStore;
use crate::config::ProxyConfig;
use crate::error::ProxyError;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Accepts client connections and captures their requests into the store.
pub struct ProxyServer {
    listen_addr: String,
    port: u16,
    backlog: u32,
    store: Arc<CaptureStore>,
    notifier: ChangeNotifier,
    running: Arc<AtomicBool>,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, store: Arc<CaptureStore>, notifier: ChangeNotifier) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            port: config.port,
            backlog: config.backlog,
            store,
            notifier,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind the listening socket and spawn the accept loop. Returns the
    /// bound address; a bind failure is fatal at startup.
    pub async fn start(&self) -> Result<SocketAddr, ProxyError> {
        let addr: SocketAddr = format!("{}:{}", self.listen_addr, self.port)
            .parse()
            .map_err(|_| ProxyError::InvalidListenAddr {
                addr: format!("{}:{}", self.listen_addr, self.port),
            })?;

        let listener = bind_listener(addr, self.backlog).map_err(|source| ProxyError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        tracing::info!("proxy listening on {}", local_addr);
        self.running.store(true, Ordering::SeqCst);

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        let store = store.clone();
                        let notifier = notifier.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, store, notifier).await;
                        });
                    }
                    // A failed accept must not stop the loop.
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Ask the accept loop to wind down after its next accept.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("proxy server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Read one client connection until EOF or error; every non-empty read
/// becomes a captured entry. The write half stays available to the
/// dispatcher through each entry's [`ClientConn`].
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<CaptureStore>,
    notifier: ChangeNotifier,
) {
    let (mut read_half, write_half) = stream.into_split();
    let client = ClientConn::new(write_half);
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(%peer, "client closed connection");
                break;
            }
            Ok(n) => {
                let entry = RequestEntry::capture(client.clone(), buf[..n].to_vec());
                tracing::info!(
                    %peer,
                    id = entry.id,
                    method = %entry.method,
                    path = %entry.path,
                    bytes = n,
                    "captured request"
                );
                store.append(entry);
                notifier.notify();
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "client read error");
                break;
            }
        }
    }

    // Close unless a dispatch operation has taken over the connection.
    if !client.is_handed_off() {
        client.close().await;
    }
}
