//! wirecheck replay engine
//!
//! Reads a recorded session, rebuilds each top-level call, and re-issues it
//! against a live API while the transport interceptor keeps commands from
//! reaching a server. Intercepted commands are recorded under the original
//! correlation id, so the two recordings can be diffed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod intercept;
pub mod state;

pub use engine::{ReplayConfig, ReplayError, ReplaySummary, Replayer};
pub use intercept::{Interceptor, ReplaySession};
