//! Captured request entries and best-effort request parsing

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::conn::ClientConn;

/// Process-wide id source; capture order is the only ordering authority.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Disposition state of a captured entry.
///
/// Transitions are monotone: `Pending` → `Forwarding` → `Completed`/`Error`,
/// or `Pending` → `Dropping` → `Dropped`/`Error`. Nothing re-enters
/// `Pending`. A replay re-runs the forwarding path from a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Forwarding,
    Completed,
    Dropping,
    Dropped,
    Error(String),
}

impl EntryStatus {
    /// Display label, as shown in status columns and the export format.
    pub fn label(&self) -> String {
        match self {
            EntryStatus::Pending => "Pending".to_string(),
            EntryStatus::Forwarding => "Forwarding".to_string(),
            EntryStatus::Completed => "Completed".to_string(),
            EntryStatus::Dropping => "Dropping".to_string(),
            EntryStatus::Dropped => "Dropped".to_string(),
            EntryStatus::Error(reason) => format!("Error: {}", reason),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One captured request and its disposition state.
///
/// The raw captured bytes are retained verbatim and never mutated; a forward
/// may send an operator-edited buffer instead, but replay and export always
/// see the pristine capture.
pub struct RequestEntry {
    /// Unique, strictly increasing in capture order, never reused.
    pub id: u64,

    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,

    /// Method token from the request line; empty if parsing failed.
    pub method: String,

    /// Path token from the request line; empty if parsing failed.
    pub path: String,

    /// Header map, case preserved as received, last-wins on duplicates.
    pub headers: HashMap<String, String>,

    /// Bytes after the blank-line terminator; empty if absent.
    pub body: Vec<u8>,

    raw: Vec<u8>,
    status: Mutex<EntryStatus>,
    dispatched: AtomicBool,
    client: ClientConn,
}

impl RequestEntry {
    /// Record a non-empty read from a client connection as a new entry.
    pub fn capture(client: ClientConn, raw: Vec<u8>) -> Arc<Self> {
        let parsed = parse_request(&raw);
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            captured_at: Utc::now(),
            method: parsed.method,
            path: parsed.path,
            headers: parsed.headers,
            body: parsed.body,
            raw,
            status: Mutex::new(EntryStatus::Pending),
            dispatched: AtomicBool::new(false),
            client,
        })
    }

    /// The exact bytes read from the client at capture time.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn status(&self) -> EntryStatus {
        self.status.lock().clone()
    }

    pub(crate) fn set_status(&self, status: EntryStatus) {
        *self.status.lock() = status;
    }

    /// Whether a terminal-disposition decision has already been issued.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Claim the at-most-once dispatch slot. Returns false if forward or
    /// drop already won it.
    pub(crate) fn begin_dispatch(&self) -> bool {
        self.dispatched
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Mark dispatched without the guard; replay is exempt from it.
    pub(crate) fn force_dispatch(&self) {
        self.dispatched.store(true, Ordering::SeqCst);
    }

    pub fn client(&self) -> &ClientConn {
        &self.client
    }
}

impl fmt::Debug for RequestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEntry")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("status", &self.status())
            .field("dispatched", &self.is_dispatched())
            .finish()
    }
}

#[derive(Default)]
struct ParsedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Best-effort parse of a captured byte buffer. Never fails: malformed input
/// just leaves the affected fields at their defaults.
fn parse_request(raw: &[u8]) -> ParsedRequest {
    let mut parsed = ParsedRequest::default();
    let lines = split_crlf(raw);
    if lines.is_empty() {
        return parsed;
    }

    let request_line = String::from_utf8_lossy(lines[0]);
    let mut tokens = request_line.split_whitespace();
    if let (Some(method), Some(path)) = (tokens.next(), tokens.next()) {
        parsed.method = method.to_string();
        parsed.path = path.to_string();
    }

    // Header lines run until the first empty line; a line without a colon is
    // silently skipped, duplicate names overwrite.
    let mut i = 1;
    while i < lines.len() && !lines[i].is_empty() {
        let line = String::from_utf8_lossy(lines[i]);
        if let Some((name, value)) = line.split_once(':') {
            parsed
                .headers
                .insert(name.trim().to_string(), value.trim().to_string());
        }
        i += 1;
    }

    // Everything after the blank line, rejoined on CRLF. No Content-Length
    // validation, no chunked decoding.
    if i + 1 < lines.len() {
        parsed.body = lines[i + 1..].join(&b"\r\n"[..]);
    }

    parsed
}

fn split_crlf(raw: &[u8]) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < raw.len() {
        if raw[i] == b'\r' && raw[i + 1] == b'\n' {
            parts.push(&raw[start..i]);
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    parts.push(&raw[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::conn::test_support::conn_pair;

    #[test]
    fn test_parse_simple_get() {
        let parsed = parse_request(b"GET /foo HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/foo");
        assert_eq!(parsed.headers.len(), 1);
        assert_eq!(parsed.headers["Host"], "example.com");
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_parse_request_line_with_one_token() {
        let parsed = parse_request(b"GET\r\nHost: a\r\n\r\n");
        assert_eq!(parsed.method, "");
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.headers["Host"], "a");
    }

    #[test]
    fn test_parse_empty_input() {
        let parsed = parse_request(b"");
        assert!(parsed.method.is_empty());
        assert!(parsed.path.is_empty());
        assert!(parsed.headers.is_empty());
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_parse_skips_header_lines_without_colon() {
        let parsed = parse_request(b"GET / HTTP/1.1\r\nnot-a-header\r\nX-Ok: yes\r\n\r\n");
        assert_eq!(parsed.headers.len(), 1);
        assert_eq!(parsed.headers["X-Ok"], "yes");
    }

    #[test]
    fn test_parse_duplicate_header_last_wins() {
        let parsed = parse_request(b"GET / HTTP/1.1\r\nX-A: one\r\nX-A: two\r\n\r\n");
        assert_eq!(parsed.headers["X-A"], "two");
    }

    #[test]
    fn test_parse_splits_header_on_first_colon_and_trims() {
        let parsed = parse_request(b"GET / HTTP/1.1\r\nX-Time:  12:30:00 \r\n\r\n");
        assert_eq!(parsed.headers["X-Time"], "12:30:00");
    }

    #[test]
    fn test_parse_no_blank_line_terminator() {
        let parsed = parse_request(b"GET / HTTP/1.1\r\nHost: a");
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.headers["Host"], "a");
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_parse_body_rejoined_on_crlf() {
        let parsed = parse_request(b"POST /p HTTP/1.1\r\nHost: a\r\n\r\nline1\r\nline2");
        assert_eq!(parsed.body, b"line1\r\nline2");
    }

    #[test]
    fn test_parse_binary_body_kept_verbatim() {
        let parsed = parse_request(b"POST / HTTP/1.1\r\nHost: a\r\n\r\n\xff\xfe\x01");
        assert_eq!(parsed.body, [0xff, 0xfe, 0x01]);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(EntryStatus::Pending.label(), "Pending");
        assert_eq!(EntryStatus::Dropped.label(), "Dropped");
        assert_eq!(
            EntryStatus::Error("No Host header".to_string()).label(),
            "Error: No Host header"
        );
    }

    #[tokio::test]
    async fn test_capture_assigns_increasing_ids_and_keeps_raw() {
        let (conn, _peer) = conn_pair().await;
        let raw = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();

        let first = RequestEntry::capture(conn.clone(), raw.clone());
        let second = RequestEntry::capture(conn, b"junk".to_vec());

        assert!(second.id > first.id);
        assert_eq!(first.raw_bytes(), raw.as_slice());
        assert_eq!(first.status(), EntryStatus::Pending);
        assert!(!first.is_dispatched());
        assert_eq!(second.method, "");
    }
}
