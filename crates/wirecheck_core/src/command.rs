//! Command documents and the command event source.
//!
//! A command is the fully formed request a client is about to send to a
//! server. The [`Monitoring`] hub notifies listeners immediately before a
//! command is transmitted and after the server answers.

use crate::error::{CoreError, CoreResult};
pub use crate::id::OperationId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

type Document = serde_json::Map<String, serde_json::Value>;

/// A low-level command document; the first key names the command
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(Document);

impl Command {
    /// Start a command: `{name: target}`
    pub fn new(name: &str, target: impl Into<serde_json::Value>) -> Self {
        let mut doc = Document::new();
        doc.insert(name.to_string(), target.into());
        Self(doc)
    }

    /// Append a field
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Command name (the first key)
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.keys().next().map_or("", String::as_str)
    }

    /// A single field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// The whole document
    #[must_use]
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Convert to a JSON value
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }

    /// Build from a JSON value
    ///
    /// # Errors
    ///
    /// Returns a format error unless the value is an object
    pub fn from_json(value: serde_json::Value) -> CoreResult<Self> {
        match value {
            serde_json::Value::Object(doc) => Ok(Self(doc)),
            other => Err(CoreError::format(format!(
                "command must be a document, got {}",
                other
            ))),
        }
    }
}

/// A server reply document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reply(serde_json::Value);

impl Reply {
    /// Wrap a reply document
    #[must_use]
    pub const fn new(doc: serde_json::Value) -> Self {
        Self(doc)
    }

    /// `{ok: 1}`
    #[must_use]
    pub fn ok() -> Self {
        Self(serde_json::json!({ "ok": 1 }))
    }

    /// `{n: count, ok: 1}`
    #[must_use]
    pub fn count(n: u64) -> Self {
        Self(serde_json::json!({ "n": n, "ok": 1 }))
    }

    /// `{cursor: {firstBatch: docs, id: 0}, ok: 1}`
    #[must_use]
    pub fn batch(docs: Vec<serde_json::Value>) -> Self {
        Self(serde_json::json!({ "cursor": { "firstBatch": docs, "id": 0 }, "ok": 1 }))
    }

    /// Affected or counted documents, from `n`
    #[must_use]
    pub fn n(&self) -> u64 {
        self.0.get("n").and_then(serde_json::Value::as_u64).unwrap_or(0)
    }

    /// Documents from `cursor.firstBatch`
    #[must_use]
    pub fn first_batch(&self) -> Vec<serde_json::Value> {
        self.0
            .pointer("/cursor/firstBatch")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// The whole reply
    #[must_use]
    pub const fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Notification that a command is about to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStarted {
    /// Operation id from the event source
    pub operation_id: OperationId,
    /// Server address
    pub address: String,
    /// The command, exactly as it will be transmitted
    pub command: Command,
}

/// Notification that a command succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSucceeded {
    /// Operation id from the event source
    pub operation_id: OperationId,
    /// Server address
    pub address: String,
    /// Command name
    pub command_name: String,
    /// Server reply
    pub reply: Reply,
}

/// Notification that a command failed
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailed {
    /// Operation id from the event source
    pub operation_id: OperationId,
    /// Server address
    pub address: String,
    /// Command name
    pub command_name: String,
    /// Failure description
    pub message: String,
}

/// Subscriber to command events
pub trait CommandListener: Send + Sync {
    /// A command is about to be sent
    fn started(&self, event: &CommandStarted);

    /// A command succeeded
    fn succeeded(&self, _event: &CommandSucceeded) {}

    /// A command failed
    fn failed(&self, _event: &CommandFailed) {}
}

/// Command event source: listener registry plus operation id allocation
#[derive(Default)]
pub struct Monitoring {
    listeners: RwLock<Vec<Arc<dyn CommandListener>>>,
    next_operation: AtomicU64,
}

impl Monitoring {
    /// Create a hub with no listeners
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener; subscribing the same instance twice is a no-op
    ///
    /// Returns whether the listener was added.
    pub fn subscribe(&self, listener: Arc<dyn CommandListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let ptr = Arc::as_ptr(&listener).cast::<()>();
        if listeners.iter().any(|l| Arc::as_ptr(l).cast::<()>() == ptr) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Number of subscribed listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Allocate an operation id
    pub fn next_operation_id(&self) -> OperationId {
        OperationId::from_raw(self.next_operation.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Notify listeners that a command is about to be sent
    pub fn publish_started(&self, event: &CommandStarted) {
        for listener in self.snapshot() {
            listener.started(event);
        }
    }

    /// Notify listeners that a command succeeded
    pub fn publish_succeeded(&self, event: &CommandSucceeded) {
        for listener in self.snapshot() {
            listener.succeeded(event);
        }
    }

    /// Notify listeners that a command failed
    pub fn publish_failed(&self, event: &CommandFailed) {
        for listener in self.snapshot() {
            listener.failed(event);
        }
    }

    // Listeners run without the registry lock held, so they may subscribe.
    fn snapshot(&self) -> Vec<Arc<dyn CommandListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Monitoring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitoring")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<String>>,
        succeeded: Mutex<Vec<u64>>,
    }

    impl CommandListener for Recorder {
        fn started(&self, event: &CommandStarted) {
            self.started.lock().unwrap().push(event.command.name().to_string());
        }

        fn succeeded(&self, event: &CommandSucceeded) {
            self.succeeded.lock().unwrap().push(event.reply.n());
        }
    }

    #[test]
    fn test_command_builder_preserves_order() {
        let cmd = Command::new("find", "people")
            .with("filter", serde_json::json!({}))
            .with("limit", 1);
        assert_eq!(cmd.name(), "find");
        let keys: Vec<&String> = cmd.as_document().keys().collect();
        assert_eq!(keys, vec!["find", "filter", "limit"]);
        assert_eq!(
            serde_json::to_string(&cmd).unwrap(),
            r#"{"find":"people","filter":{},"limit":1}"#
        );
    }

    #[test]
    fn test_command_from_json_requires_document() {
        assert!(Command::from_json(serde_json::json!([1])).unwrap_err().is_format());
        let cmd = Command::from_json(serde_json::json!({"count": "people"})).unwrap();
        assert_eq!(cmd.name(), "count");
    }

    #[test]
    fn test_reply_accessors() {
        assert_eq!(Reply::count(3).n(), 3);
        let reply = Reply::batch(vec![serde_json::json!({"a": 1})]);
        assert_eq!(reply.first_batch().len(), 1);
        assert!(Reply::ok().first_batch().is_empty());
    }

    #[test]
    fn test_monitoring_publish() {
        let monitoring = Monitoring::new();
        let recorder = Arc::new(Recorder::default());
        assert!(monitoring.subscribe(recorder.clone()));

        monitoring.publish_started(&CommandStarted {
            operation_id: monitoring.next_operation_id(),
            address: "memory".to_string(),
            command: Command::new("count", "people"),
        });
        monitoring.publish_succeeded(&CommandSucceeded {
            operation_id: OperationId::from_raw(1),
            address: "memory".to_string(),
            command_name: "count".to_string(),
            reply: Reply::count(4),
        });

        assert_eq!(*recorder.started.lock().unwrap(), vec!["count"]);
        assert_eq!(*recorder.succeeded.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let monitoring = Monitoring::new();
        let recorder: Arc<dyn CommandListener> = Arc::new(Recorder::default());
        assert!(monitoring.subscribe(Arc::clone(&recorder)));
        assert!(!monitoring.subscribe(recorder));
        assert_eq!(monitoring.listener_count(), 1);
    }

    #[test]
    fn test_operation_ids_increase() {
        let monitoring = Monitoring::new();
        let a = monitoring.next_operation_id();
        let b = monitoring.next_operation_id();
        assert!(b > a);
    }
}
