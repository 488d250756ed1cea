//! Bounded, concurrency-safe store of captured entries

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::entry::RequestEntry;

/// Default capture bound; the oldest entry is evicted beyond it.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Ordered collection of captured entries, bounded with FIFO eviction.
///
/// The one broadly shared mutable resource in the engine. Every structural
/// mutation and every snapshot happens under the internal lock; network I/O
/// never does. Eviction ignores entry status: an in-flight entry can leave
/// the store while its dispatch task keeps running, since store membership
/// and connection lifecycle are independent.
pub struct CaptureStore {
    entries: RwLock<VecDeque<Arc<RequestEntry>>>,
    max_entries: usize,
}

/// Export shape for one entry: a plain object, no schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub id: u64,
    pub method: String,
    pub path: String,
    pub status: String,
    pub headers: HashMap<String, String>,
    /// Best-effort text decoding of the body bytes.
    pub body: String,
}

impl CaptureStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries,
        }
    }

    /// Append a captured entry, evicting the oldest if over the bound.
    pub fn append(&self, entry: Arc<RequestEntry>) {
        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// Consistent read-only copy for display, filtering and export.
    pub fn snapshot(&self) -> Vec<Arc<RequestEntry>> {
        self.entries.read().iter().cloned().collect()
    }

    /// Look up a previously captured entry; `None` if unknown or evicted.
    pub fn get(&self, id: u64) -> Option<Arc<RequestEntry>> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    /// Drop every entry from the store. Connections and in-flight dispatch
    /// tasks referenced by removed entries are left untouched.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Export every currently captured entry.
    pub fn export(&self) -> Vec<ExportedEntry> {
        self.snapshot()
            .iter()
            .map(|e| ExportedEntry {
                id: e.id,
                method: e.method.clone(),
                path: e.path.clone(),
                status: e.status().label(),
                headers: e.headers.clone(),
                body: String::from_utf8_lossy(&e.body).to_string(),
            })
            .collect()
    }

    /// Export as a pretty-printed JSON array.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.export())
    }

    /// Entries whose method matches exactly.
    pub fn filter_by_method(&self, method: &str) -> Vec<Arc<RequestEntry>> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.method == method)
            .collect()
    }

    /// Entries whose status label starts with the given prefix, so "Error"
    /// matches every failure reason.
    pub fn filter_by_status(&self, prefix: &str) -> Vec<Arc<RequestEntry>> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.status().label().starts_with(prefix))
            .collect()
    }

    /// Case-insensitive keyword search over "method path status".
    pub fn search(&self, keyword: &str) -> Vec<Arc<RequestEntry>> {
        let keyword = keyword.to_lowercase();
        self.snapshot()
            .into_iter()
            .filter(|e| {
                format!("{} {} {}", e.method, e.path, e.status())
                    .to_lowercase()
                    .contains(&keyword)
            })
            .collect()
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
