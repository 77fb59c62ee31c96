//! wirecheck action log
//!
//! One entry per line: `ACTION:CORRELATION_ID:PAYLOAD`. Entries are written
//! through a pluggable sink and read back through a peekable stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod sink;
pub mod stream;

pub use entry::{Action, LogEntry};
pub use sink::{
    on_action, set_on_action, ActionSink, FnSink, GlobalSink, MemorySink, NullSink, SinkError,
    WriterSink,
};
pub use stream::EntryStream;
