//! Intercepting proxy engine
//!
//! Accepts client connections, captures each raw request into a bounded
//! store, and lets an operator forward, drop or replay captured entries.
//! Consumers learn about changes through the signal-only notifier and
//! re-derive whatever they display from [`CaptureStore::snapshot`].

mod conn;
mod dispatch;
mod entry;
mod notify;
mod server;
mod store;

pub use conn::ClientConn;
pub use dispatch::{Dispatcher, DROP_RESPONSE};
pub use entry::{EntryStatus, RequestEntry};
pub use notify::{ChangeListener, ChangeNotifier, REFRESH_TICK};
pub use server::ProxyServer;
pub use store::{CaptureStore, ExportedEntry, DEFAULT_MAX_ENTRIES};
