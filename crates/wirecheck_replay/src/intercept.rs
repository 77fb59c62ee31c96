//! Transport interception for replay sessions.
//!
//! While the current thread is replaying, the interceptor never calls the
//! wrapped transport. It publishes the command to the event source, so the
//! watcher records it exactly as in a normal run, then either hands back
//! the next queued reply or aborts the delivery.

use crate::state;
use std::sync::Arc;
use tracing::{debug, trace};
use wirecheck_core::{
    Command, CommandStarted, CommandSucceeded, DeliveryError, Monitoring, Reply, Transport,
};
use wirecheck_watch::Watcher;

/// Transport wrapper that substitutes recorded replies during replay
pub struct Interceptor<T> {
    inner: T,
    monitoring: Arc<Monitoring>,
}

impl<T: Transport> Interceptor<T> {
    /// Wrap a transport; synthetic events go to `monitoring`
    pub fn new(inner: T, monitoring: Arc<Monitoring>) -> Self {
        Self { inner, monitoring }
    }

    /// The wrapped transport
    pub const fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for Interceptor<T> {
    fn address(&self) -> &str {
        self.inner.address()
    }

    fn deliver(&self, command: &Command) -> Result<Reply, DeliveryError> {
        if !state::is_replaying() {
            return self.inner.deliver(command);
        }

        let operation_id = self.monitoring.next_operation_id();
        let address = self.inner.address().to_string();
        self.monitoring.publish_started(&CommandStarted {
            operation_id,
            address: address.clone(),
            command: command.clone(),
        });

        match state::dequeue() {
            Some(reply) => {
                trace!(command = command.name(), "substituting recorded reply");
                self.monitoring.publish_succeeded(&CommandSucceeded {
                    operation_id,
                    address,
                    command_name: command.name().to_string(),
                    reply: reply.clone(),
                });
                Ok(reply)
            }
            None => {
                debug!(command = command.name(), "no recorded reply; aborting call");
                Err(DeliveryError::Aborted)
            }
        }
    }
}

/// Wiring for one replay process
///
/// Installing subscribes the watcher to the event source once, however many
/// times it is called; transports built afterwards are intercepted.
#[derive(Debug, Clone)]
pub struct ReplaySession {
    watcher: Arc<Watcher>,
    monitoring: Arc<Monitoring>,
}

impl ReplaySession {
    /// Subscribe `watcher` to `monitoring` (idempotent)
    pub fn install(watcher: Arc<Watcher>, monitoring: Arc<Monitoring>) -> Self {
        if watcher.install(&monitoring) {
            debug!("replay watcher subscribed");
        }
        Self { watcher, monitoring }
    }

    /// Wrap a transport with interception
    pub fn intercept<T: Transport>(&self, transport: T) -> Interceptor<T> {
        Interceptor::new(transport, Arc::clone(&self.monitoring))
    }

    /// The watcher recording the replay
    #[must_use]
    pub const fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    /// The event source replayed commands are published to
    #[must_use]
    pub const fn monitoring(&self) -> &Arc<Monitoring> {
        &self.monitoring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wirecheck_core::{CorrelationId, TypeRegistry};
    use wirecheck_log::{Action, LogEntry, MemorySink};
    use wirecheck_serial::Serializer;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Transport for Counting {
        fn address(&self) -> &str {
            "counting"
        }

        fn deliver(&self, _command: &Command) -> Result<Reply, DeliveryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::ok())
        }
    }

    fn session(sink: &Arc<MemorySink>) -> ReplaySession {
        let watcher = Watcher::new(Serializer::new(TypeRegistry::new())).with_sink(Arc::clone(sink));
        ReplaySession::install(Arc::new(watcher), Arc::new(Monitoring::new()))
    }

    #[test]
    fn test_passthrough_when_not_replaying() {
        let sink = Arc::new(MemorySink::new());
        let transport = session(&sink).intercept(Counting::default());
        transport.deliver(&Command::new("ping", 1)).unwrap();
        assert_eq!(transport.inner().0.load(Ordering::SeqCst), 1);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_abort_and_substitute() {
        let sink = Arc::new(MemorySink::new());
        let session = session(&sink);
        let transport = session.intercept(Counting::default());
        let command = Command::new("find", "people").with("filter", serde_json::json!({}));

        state::clear();
        state::replaying(|| {
            session.watcher().with_correlation(CorrelationId::new("orig.1"), || {
                state::enqueue(Reply::batch(vec![]));
                assert!(transport.deliver(&command).is_ok());
                assert_eq!(transport.deliver(&command), Err(DeliveryError::Aborted));
            });
        });
        assert_eq!(transport.inner().0.load(Ordering::SeqCst), 0);

        let entries: Vec<LogEntry> = sink.lines().iter().map(|l| LogEntry::parse(l).unwrap()).collect();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.action, Action::Command);
            assert_eq!(entry.correlation_id, Some(CorrelationId::new("orig.1")));
            assert_eq!(entry.payload, r#"{"find":"people","filter":{}}"#);
        }
    }

    #[test]
    fn test_install_is_idempotent() {
        let sink = Arc::new(MemorySink::new());
        let first = session(&sink);
        let again = ReplaySession::install(Arc::clone(first.watcher()), Arc::clone(first.monitoring()));
        assert_eq!(again.monitoring().listener_count(), 1);
    }
}
