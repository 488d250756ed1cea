//! Client connection handle shared between capture and dispatch

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Handle to the write half of an accepted client socket.
///
/// The capture loop keeps the read half to itself; every entry captured on
/// the connection gets a clone of this handle so the dispatcher can deliver
/// the origin's response (or a rejection) back to the client later. The half
/// is closed exactly once: after [`ClientConn::close`] all further writes
/// fail with `NotConnected`.
#[derive(Clone)]
pub struct ClientConn {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    write: Mutex<Option<OwnedWriteHalf>>,

    /// Set once a dispatch operation takes responsibility for closing the
    /// connection; the capture loop then leaves it alone on read EOF/error.
    handed_off: AtomicBool,
}

impl ClientConn {
    pub fn new(write: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                write: Mutex::new(Some(write)),
                handed_off: AtomicBool::new(false),
            }),
        }
    }

    /// Write all of `buf` to the client.
    pub async fn send(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.write.lock().await;
        match guard.as_mut() {
            Some(half) => {
                half.write_all(buf).await?;
                half.flush().await
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "client connection closed",
            )),
        }
    }

    /// Shut down and drop the write half. Safe to call more than once; only
    /// the first call does anything.
    pub async fn close(&self) {
        let mut guard = self.inner.write.lock().await;
        if let Some(mut half) = guard.take() {
            let _ = half.shutdown().await;
        }
    }

    /// Mark the connection as owned by a dispatch operation.
    pub fn mark_handed_off(&self) {
        self.inner.handed_off.store(true, Ordering::SeqCst);
    }

    pub fn is_handed_off(&self) -> bool {
        self.inner.handed_off.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ClientConn;
    use tokio::net::{TcpListener, TcpStream};

    /// Loopback socket pair: a `ClientConn` wrapping the accepted side's
    /// write half, and the peer stream playing the role of the client.
    pub(crate) async fn conn_pair() -> (ClientConn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = accepted.into_split();
        // The capture loop would own the read half; tests don't need it.
        drop(read_half);
        (ClientConn::new(write_half), peer)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::conn_pair;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (conn, mut peer) = conn_pair().await;
        conn.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_later_sends() {
        let (conn, mut peer) = conn_pair().await;
        conn.close().await;
        conn.close().await;

        let err = conn.send(b"late").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);

        // Peer observes EOF once the write half is gone.
        let mut buf = [0u8; 16];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handed_off_flag() {
        let (conn, _peer) = conn_pair().await;
        assert!(!conn.is_handed_off());
        conn.mark_handed_off();
        assert!(conn.is_handed_off());
        assert!(conn.clone().is_handed_off());
    }
}
