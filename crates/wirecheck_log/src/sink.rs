//! Action sinks: where emitted log lines go.
//!
//! A sink receives one complete line per call. Writers hold a lock across
//! the whole line so concurrent emitters never interleave mid-line.

use once_cell::sync::OnceCell;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Sink failure
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying writer failed
    #[error("Sink I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The process-wide sink was already set
    #[error("on_action sink is already registered")]
    AlreadyRegistered,

    /// A callback sink reported a failure
    #[error("Sink rejected entry: {0}")]
    Rejected(String),
}

/// Receiver of emitted log lines
pub trait ActionSink: Send + Sync {
    /// Accept one line (without trailing newline)
    ///
    /// # Errors
    ///
    /// Returns an error if the line could not be recorded
    fn on_action(&self, line: &str) -> Result<(), SinkError>;
}

impl<T: ActionSink + ?Sized> ActionSink for Arc<T> {
    fn on_action(&self, line: &str) -> Result<(), SinkError> {
        (**self).on_action(line)
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ActionSink for NullSink {
    fn on_action(&self, _line: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink backed by a callback
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&str) -> Result<(), SinkError> + Send + Sync,
{
    /// Wrap a callback
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ActionSink for FnSink<F>
where
    F: Fn(&str) -> Result<(), SinkError> + Send + Sync,
{
    fn on_action(&self, line: &str) -> Result<(), SinkError> {
        (self.0)(line)
    }
}

/// Sink appending newline-terminated lines to a writer
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap a writer
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Flush buffered lines
    ///
    /// # Errors
    ///
    /// Returns the writer's flush error
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.flush()?;
        Ok(())
    }

    /// Consume the sink and return the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriterSink<std::io::BufWriter<std::fs::File>> {
    /// Create (truncating) a log file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self, SinkError> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(std::io::BufWriter::new(file)))
    }
}

impl<W: Write + Send> ActionSink for WriterSink<W> {
    fn on_action(&self, line: &str) -> Result<(), SinkError> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(buf.as_bytes())?;
        Ok(())
    }
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return all recorded lines
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// All lines joined with newlines, one trailing newline per line
    #[must_use]
    pub fn contents(&self) -> String {
        self.lines().iter().map(|l| format!("{}\n", l)).collect()
    }
}

impl ActionSink for MemorySink {
    fn on_action(&self, line: &str) -> Result<(), SinkError> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

static ON_ACTION: OnceCell<Box<dyn ActionSink>> = OnceCell::new();

/// Register the process-wide sink; it can be set once
///
/// # Errors
///
/// Returns `AlreadyRegistered` if a sink was set before
pub fn set_on_action(sink: impl ActionSink + 'static) -> Result<(), SinkError> {
    ON_ACTION
        .set(Box::new(sink))
        .map_err(|_| SinkError::AlreadyRegistered)
}

/// The process-wide sink, if registered
#[must_use]
pub fn on_action() -> Option<&'static dyn ActionSink> {
    ON_ACTION.get().map(|sink| &**sink)
}

/// Forwards to the process-wide sink; drops lines while none is registered
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalSink;

impl ActionSink for GlobalSink {
    fn on_action(&self, line: &str) -> Result<(), SinkError> {
        match on_action() {
            Some(sink) => sink.on_action(line),
            None => Ok(()),
        }
    }
}
