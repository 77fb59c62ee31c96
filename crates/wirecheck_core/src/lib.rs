//! wirecheck core types
//!
//! Pure types shared by the recorder, the serializer, the replayer and the
//! analyzer: the error taxonomy, identifiers, the live value model, the
//! domain type registry, command documents and the command event source.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod command;
pub mod error;
pub mod id;
pub mod schema;
pub mod transport;
pub mod value;

// Re-exports
pub use api::{Block, Creatable, Deletable, Findable, Invoke, Request};
pub use command::{
    Command, CommandFailed, CommandListener, CommandStarted, CommandSucceeded, Monitoring,
    OperationId, Reply,
};
pub use error::{CallError, CoreError, CoreResult, DeliveryError};
pub use id::{CorrelationId, CorrelationIdGenerator, ObjectId};
pub use schema::{EntitySchema, RelationDef, RelationKind, TypeRegistry};
pub use transport::{MonitoredTransport, Transport};
pub use value::{Entity, EntityFlags, EntityKey, EntityRef, Invocation, RangeValue, Value};
