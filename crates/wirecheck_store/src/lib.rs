//! wirecheck document store
//!
//! A small document database that speaks commands through the
//! [`wirecheck_core::Transport`] boundary, plus a client exposing the
//! watched API on top of it. The client can build commands in two
//! dialects, standing in for two versions of a data-access library.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod dialect;
pub mod models;
pub mod query;
pub mod scenario;
pub mod server;

pub use client::Client;
pub use config::{Dialect, StoreConfig};
pub use models::playground;
pub use query::QuerySpec;
pub use scenario::{Population, populate, run_features};
pub use server::MemoryServer;
