//! The Watcher: scoped capture of watched calls and their commands.
//!
//! A top-level watched call emits `start`, then one `command` per command
//! event raised while it runs, then `stop`. Nested watched calls on the same
//! thread reuse the open scope. Emission never fails the watched call: any
//! encoding or sink failure, including a panicking sink, is reported through
//! `tracing` and the entry is dropped.

use crate::config::WatcherConfig;
use crate::scope::{self, Scope, ScopeGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};
use wirecheck_core::{
    CommandListener, CommandStarted, CommandSucceeded, CoreError, CorrelationId,
    CorrelationIdGenerator, Monitoring, Request,
};
use wirecheck_log::{Action, ActionSink, GlobalSink, LogEntry, SinkError};
use wirecheck_serial::Serializer;

/// Why an entry could not be emitted
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// Payload could not be encoded
    #[error("Encoding failed: {0}")]
    Encode(#[from] CoreError),

    /// The sink refused the line
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl From<serde_json::Error> for EmitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.into())
    }
}

/// How [`Watcher::suppress`] treats the block it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressMode {
    /// Clear the scope; a watched call inside the block opens its own
    Local,
    /// Pin the scope to "nobody"; nothing inside the block is recorded
    All,
}

/// Records watched calls and the commands they trigger
pub struct Watcher {
    config: WatcherConfig,
    ids: CorrelationIdGenerator,
    sink: Box<dyn ActionSink>,
    serializer: Serializer,
}

impl Watcher {
    /// Create a watcher writing to the process-wide `on_action` sink
    #[must_use]
    pub fn new(serializer: Serializer) -> Self {
        Self {
            config: WatcherConfig::default(),
            ids: CorrelationIdGenerator::new(),
            sink: Box::new(GlobalSink),
            serializer,
        }
    }

    /// Write to `sink` instead of the process-wide sink
    #[must_use]
    pub fn with_sink(mut self, sink: impl ActionSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific id generator
    #[must_use]
    pub fn with_ids(mut self, ids: CorrelationIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Serializer used for call descriptors
    #[must_use]
    pub const fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    /// Subscribe to a command event source
    ///
    /// Safe to call repeatedly; returns whether this call subscribed.
    pub fn install(self: &Arc<Self>, monitoring: &Monitoring) -> bool {
        let listener: Arc<dyn CommandListener> = Arc::clone(self) as Arc<dyn CommandListener>;
        monitoring.subscribe(listener)
    }

    /// Run `body` as the watched call `request`
    ///
    /// Opens a scope, emitting `start` and then `stop`, only when the thread
    /// has none. The result of `body` is returned unchanged; `stop` is
    /// emitted even if `body` panics.
    pub fn watch<R>(&self, request: &Request, has_block: bool, body: impl FnOnce() -> R) -> R {
        if !scope::current().is_inactive() {
            return body();
        }

        let id = self.ids.next_id();
        debug!(correlation_id = %id, message = %request.message, "opening watch scope");
        self.emit(Action::Start, Some(&id), || {
            let record = self.serializer.encode_call(request, has_block)?;
            Ok(serde_json::to_string(&record)?)
        });

        let _open = OpenScope {
            watcher: self,
            _scope: scope::enter(Scope::Active(id.clone())),
            id,
        };
        body()
    }

    /// Run `body` with the scope cleared (`Local`) or pinned to nobody (`All`)
    ///
    /// The previous scope is restored however `body` exits.
    pub fn suppress<R>(&self, mode: SuppressMode, body: impl FnOnce() -> R) -> R {
        let scope = match mode {
            SuppressMode::Local => Scope::Inactive,
            SuppressMode::All => Scope::Suppressed,
        };
        let _guard = scope::enter(scope);
        body()
    }

    /// Run `body` with commands tagged as `id`, without `start`/`stop`
    pub fn with_correlation<R>(&self, id: CorrelationId, body: impl FnOnce() -> R) -> R {
        let _guard = scope::enter(Scope::Active(id));
        body()
    }

    fn emit(
        &self,
        action: Action,
        id: Option<&CorrelationId>,
        payload: impl FnOnce() -> Result<String, EmitError>,
    ) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), EmitError> {
            let payload = if action.has_payload() { payload()? } else { String::new() };
            let entry = LogEntry::new(action, id.cloned(), payload);
            self.sink.on_action(&entry.to_line())?;
            Ok(())
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(action = %action, correlation_id = ?id, error = %err, "dropped log entry");
            }
            Err(_) => {
                error!(action = %action, correlation_id = ?id, "sink panicked; dropped log entry");
            }
        }
    }
}

impl CommandListener for Watcher {
    fn started(&self, event: &CommandStarted) {
        if let Some(id) = scope::current_id() {
            self.emit(Action::Command, Some(&id), || Ok(serde_json::to_string(&event.command)?));
        }
    }

    fn succeeded(&self, event: &CommandSucceeded) {
        if !self.config.capture_replies {
            return;
        }
        if let Some(id) = scope::current_id() {
            self.emit(Action::Result, Some(&id), || Ok(serde_json::to_string(&event.reply)?));
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("config", &self.config)
            .field("prefix", &self.ids.prefix())
            .finish_non_exhaustive()
    }
}

// `stop` is emitted in `drop`, before the `_scope` field restores the
// previous scope.
struct OpenScope<'a> {
    watcher: &'a Watcher,
    id: CorrelationId,
    _scope: ScopeGuard,
}

impl Drop for OpenScope<'_> {
    fn drop(&mut self) {
        self.watcher.emit(Action::Stop, Some(&self.id), || Ok(String::new()));
        debug!(correlation_id = %self.id, "closed watch scope");
    }
}
