//! wirecheck recorder
//!
//! The [`Watcher`] scopes observation to the current thread, assigns
//! correlation ids, and turns command events into log entries. The
//! [`Instrumented`] adapter wraps a watched API so that every operation on
//! its [`WatchList`] runs inside a watch scope.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod instrument;
pub mod scope;
pub mod watcher;

pub use config::WatcherConfig;
pub use instrument::{Instrumented, ReceiverKind, WatchList};
pub use scope::{Scope, ScopeGuard};
pub use watcher::{EmitError, SuppressMode, Watcher};
