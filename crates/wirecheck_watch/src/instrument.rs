//! Instrumentation layer: wrap a watched API so listed operations run
//! inside a watch scope.

use crate::watcher::{SuppressMode, Watcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wirecheck_core::{Block, CallError, Invoke, Request, Value};

/// Which kind of receiver a watched operation is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverKind {
    /// A class reference (finders, creators, bulk removal)
    Class,
    /// A single document
    Entity,
    /// A query or lazy relation collection
    Query,
}

impl ReceiverKind {
    /// Classify a receiver; plain data is never watched
    #[must_use]
    pub const fn of(receiver: &Value) -> Option<Self> {
        match receiver {
            Value::Class(_) => Some(Self::Class),
            Value::Entity(_) => Some(Self::Entity),
            Value::Deferred(_) => Some(Self::Query),
            _ => None,
        }
    }
}

/// Operations enrolled for instrumentation, per receiver kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchList {
    /// Operations on class references
    pub class: Vec<String>,
    /// Operations on documents
    pub entity: Vec<String>,
    /// Operations on queries and relation collections
    pub query: Vec<String>,
}

const CLASS_OPERATIONS: &[&str] = &[
    "count",
    "estimated_count",
    "empty?",
    "exists?",
    "find",
    "find_by",
    "find_by!",
    "first",
    "last",
    "create",
    "create!",
    "delete_all",
    "destroy_all",
];

const ENTITY_OPERATIONS: &[&str] = &[
    "delete",
    "destroy",
    "destroy!",
    "reload",
    "remove",
    "insert",
    "update_document",
    "inc",
    "bit",
    "pop",
];

const QUERY_OPERATIONS: &[&str] = &[
    "count", "exists?", "first", "last", "delete", "delete_all", "each",
];

impl Default for WatchList {
    fn default() -> Self {
        let owned = |ops: &[&str]| -> Vec<String> { ops.iter().map(|s| (*s).to_string()).collect() };
        Self {
            class: owned(CLASS_OPERATIONS),
            entity: owned(ENTITY_OPERATIONS),
            query: owned(QUERY_OPERATIONS),
        }
    }
}

impl WatchList {
    /// A list with nothing enrolled
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            class: Vec::new(),
            entity: Vec::new(),
            query: Vec::new(),
        }
    }

    /// Enroll one more operation
    #[must_use]
    pub fn with(mut self, kind: ReceiverKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let ops = self.operations_mut(kind);
        if !ops.contains(&message) {
            ops.push(message);
        }
        self
    }

    /// Operations enrolled for a receiver kind
    #[must_use]
    pub fn operations(&self, kind: ReceiverKind) -> &[String] {
        match kind {
            ReceiverKind::Class => &self.class,
            ReceiverKind::Entity => &self.entity,
            ReceiverKind::Query => &self.query,
        }
    }

    fn operations_mut(&mut self, kind: ReceiverKind) -> &mut Vec<String> {
        match kind {
            ReceiverKind::Class => &mut self.class,
            ReceiverKind::Entity => &mut self.entity,
            ReceiverKind::Query => &mut self.query,
        }
    }

    /// Whether `request` is a watched call
    #[must_use]
    pub fn covers(&self, request: &Request) -> bool {
        ReceiverKind::of(&request.receiver)
            .is_some_and(|kind| self.operations(kind).iter().any(|m| *m == request.message))
    }
}

/// A watched API whose listed operations run under the watcher
///
/// A caller-supplied continuation runs with the scope cleared, so commands
/// it triggers are not attributed to the call that yielded to it.
pub struct Instrumented<A> {
    inner: A,
    watcher: Arc<Watcher>,
    watch_list: WatchList,
}

impl<A: Invoke> Instrumented<A> {
    /// Wrap `inner` with the default watch list
    pub fn new(inner: A, watcher: Arc<Watcher>) -> Self {
        Self::with_watch_list(inner, watcher, WatchList::default())
    }

    /// Wrap `inner` with a specific watch list
    pub fn with_watch_list(inner: A, watcher: Arc<Watcher>, watch_list: WatchList) -> Self {
        Self {
            inner,
            watcher,
            watch_list,
        }
    }

    /// The wrapped API
    pub const fn inner(&self) -> &A {
        &self.inner
    }

    /// The enrolled operations
    pub const fn watch_list(&self) -> &WatchList {
        &self.watch_list
    }
}

impl<A: Invoke> Invoke for Instrumented<A> {
    fn invoke(&self, request: &Request, block: Option<Block<'_>>) -> Result<Value, CallError> {
        if !self.watch_list.covers(request) {
            return self.inner.invoke(request, block);
        }

        let has_block = block.is_some();
        self.watcher.watch(request, has_block, || match block {
            Some(block) => {
                let watcher = &self.watcher;
                let mut unattributed =
                    |value: &Value| watcher.suppress(SuppressMode::Local, || block(value));
                self.inner.invoke(request, Some(&mut unattributed))
            }
            None => self.inner.invoke(request, None),
        })
    }
}
