//! wirecheck structural serializer
//!
//! Turns live values (including cyclic entity graphs that share identity)
//! into a tagged, replayable form and back. Entities are written once into
//! a per-pass environment and referenced by identity key everywhere else.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod env;
pub mod serializer;
pub mod wire;

pub use call::CallRecord;
pub use env::{DeserializeEnv, SerializeEnv};
pub use serializer::Serializer;
pub use wire::{Atomic, Encoded, HydrationRecord, Serialized, WireInvocation};
