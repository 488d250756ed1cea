//! holdfast - interactive HTTP intercepting proxy engine
//!
//! Holds each captured request in a reviewable staging area until an
//! operator forwards, drops or replays it. The library is the engine;
//! inspectors, list views and other presentation layers consume it through
//! three boundaries:
//!
//! - capture notifications: [`proxy::ChangeNotifier::subscribe`], then
//!   re-derive state from [`proxy::CaptureStore::snapshot`]
//! - selection and export: [`proxy::CaptureStore::get`] /
//!   [`proxy::CaptureStore::export`]
//! - dispatch: [`proxy::Dispatcher::forward`], [`proxy::Dispatcher::drop`],
//!   [`proxy::Dispatcher::replay`]

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{ConfigError, ProxyError};
pub use proxy::{
    CaptureStore, ChangeListener, ChangeNotifier, Dispatcher, EntryStatus, ExportedEntry,
    ProxyServer, RequestEntry,
};
