//! Forward/drop/replay state machine

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::entry::{EntryStatus, RequestEntry};
use super::notify::ChangeNotifier;
use super::store::CaptureStore;

/// Rejection written verbatim to the client when an entry is dropped.
pub const DROP_RESPONSE: &[u8] =
    b"HTTP/1.1 403 Forbidden\r\nConnection: close\r\n\r\nRequest Dropped";

const RELAY_BUF_SIZE: usize = 64 * 1024;

/// Decides a captured entry's fate. Forward and drop are guarded to happen
/// at most once per entry; replay is exempt and always re-sends the pristine
/// captured bytes at the original client connection. Each operation runs on
/// its own task so a stuck exchange cannot block the acceptor or other
/// entries.
pub struct Dispatcher {
    store: Arc<CaptureStore>,
    notifier: ChangeNotifier,
}

impl Dispatcher {
    pub fn new(store: Arc<CaptureStore>, notifier: ChangeNotifier) -> Self {
        Self { store, notifier }
    }

    /// Forward the entry to its origin, optionally with operator-edited
    /// bytes. No-op on an unknown id or an already dispatched entry.
    pub fn forward(&self, id: u64, override_bytes: Option<Vec<u8>>) {
        let Some(entry) = self.store.get(id) else {
            tracing::debug!(id, "forward on unknown entry, ignoring");
            return;
        };
        if !entry.begin_dispatch() {
            tracing::debug!(id, "entry already dispatched, forward ignored");
            return;
        }

        let bytes = override_bytes.unwrap_or_else(|| entry.raw_bytes().to_vec());
        self.launch_forward(entry, bytes);
    }

    /// Reject the entry with the fixed 403 response. No-op on an unknown id
    /// or an already dispatched entry.
    pub fn drop(&self, id: u64) {
        let Some(entry) = self.store.get(id) else {
            tracing::debug!(id, "drop on unknown entry, ignoring");
            return;
        };
        if !entry.begin_dispatch() {
            tracing::debug!(id, "entry already dispatched, drop ignored");
            return;
        }

        entry.client().mark_handed_off();
        entry.set_status(EntryStatus::Dropping);
        self.notifier.notify();
        tracing::info!(id, "dropping request");

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            drop_task(entry, notifier).await;
        });
    }

    /// Re-send the pristine captured bytes, even if the entry was already
    /// forwarded or dropped. If the client connection is already closed the
    /// relay surfaces that as an Error status.
    pub fn replay(&self, id: u64) {
        let Some(entry) = self.store.get(id) else {
            tracing::debug!(id, "replay on unknown entry, ignoring");
            return;
        };

        entry.force_dispatch();
        let bytes = entry.raw_bytes().to_vec();
        self.launch_forward(entry, bytes);
    }

    fn launch_forward(&self, entry: Arc<RequestEntry>, bytes: Vec<u8>) {
        entry.client().mark_handed_off();
        entry.set_status(EntryStatus::Forwarding);
        self.notifier.notify();
        tracing::info!(
            id = entry.id,
            method = %entry.method,
            path = %entry.path,
            "forwarding request"
        );

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            forward_task(entry, bytes, notifier).await;
        });
    }
}

async fn forward_task(entry: Arc<RequestEntry>, bytes: Vec<u8>, notifier: ChangeNotifier) {
    let outcome = relay_exchange(&entry, &bytes).await;
    entry.client().close().await;

    match outcome {
        Ok(()) => {
            tracing::info!(id = entry.id, "forward completed");
            entry.set_status(EntryStatus::Completed);
        }
        Err(reason) => {
            tracing::warn!(id = entry.id, %reason, "forward failed");
            entry.set_status(EntryStatus::Error(reason));
        }
    }
    notifier.notify();
}

/// Send the request to the origin and relay its response back to the client
/// until the origin closes. A client that goes away mid-relay ends the relay
/// without failing the exchange; a client handle that was already closed by
/// a prior dispatch fails it, so a replay against a finished entry shows up
/// as an Error rather than a phantom success.
async fn relay_exchange(entry: &RequestEntry, bytes: &[u8]) -> Result<(), String> {
    let (host, port) = resolve_target(entry)?;

    let mut origin = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| format!("connect to {}:{} failed: {}", host, port, e))?;
    origin.write_all(bytes).await.map_err(|e| e.to_string())?;

    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    loop {
        let n = origin.read(&mut buf).await.map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        if let Err(e) = entry.client().send(&buf[..n]).await {
            if e.kind() == ErrorKind::NotConnected {
                return Err("client connection closed".to_string());
            }
            break;
        }
    }
    Ok(())
}

/// Resolve the origin host/port from the Host header: optional `:port`
/// suffix, port 80 when absent. Header name lookup is case-insensitive.
fn resolve_target(entry: &RequestEntry) -> Result<(String, u16), String> {
    let host_header = entry
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "No Host header".to_string())?;

    match host_header.split_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| format!("invalid port in Host header: {}", host_header))?;
            Ok((host.to_string(), port))
        }
        None => Ok((host_header.to_string(), 80)),
    }
}

async fn drop_task(entry: Arc<RequestEntry>, notifier: ChangeNotifier) {
    let result = entry.client().send(DROP_RESPONSE).await;
    entry.client().close().await;

    match result {
        Ok(()) => {
            tracing::info!(id = entry.id, "request dropped");
            entry.set_status(EntryStatus::Dropped);
        }
        Err(e) => {
            tracing::warn!(id = entry.id, error = %e, "drop response write failed");
            entry.set_status(EntryStatus::Error(e.to_string()));
        }
    }
    notifier.notify();
}
