//! The watched API boundary.
//!
//! Every watched operation is `receiver.message(args, kwargs, block)`.
//! [`Invoke`] is the dynamic form the replayer needs; [`Findable`],
//! [`Creatable`] and [`Deletable`] are typed capabilities layered on top of
//! it, so any adapter that implements `Invoke` (including an instrumenting
//! wrapper) exposes them too.

use crate::error::{CallError, CoreError};
use crate::value::{EntityRef, Value};
use indexmap::IndexMap;
use std::sync::Arc;

/// Caller-supplied continuation, invoked once per yielded value
pub type Block<'a> = &'a mut dyn FnMut(&Value);

/// A call on the watched API, without its continuation
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Object the message is sent to
    pub receiver: Value,
    /// Operation name
    pub message: String,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Keyword arguments
    pub kwargs: IndexMap<String, Value>,
}

impl Request {
    /// Create a request without arguments
    pub fn new(receiver: Value, message: impl Into<String>) -> Self {
        Self {
            receiver,
            message: message.into(),
            args: Vec::new(),
            kwargs: IndexMap::new(),
        }
    }

    /// Set positional arguments
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Add a keyword argument
    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    /// Positional argument by index
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Clear relation slots throughout the receiver and arguments
    ///
    /// See [`Value::release_relations`].
    pub fn release_relations(&self) {
        self.receiver.release_relations();
        for value in self.args.iter().chain(self.kwargs.values()) {
            value.release_relations();
        }
    }
}

/// Dynamic dispatch onto the watched API
pub trait Invoke: Send + Sync {
    /// Perform the call
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying operation fails with
    fn invoke(&self, request: &Request, block: Option<Block<'_>>) -> Result<Value, CallError>;
}

impl<T: Invoke + ?Sized> Invoke for Arc<T> {
    fn invoke(&self, request: &Request, block: Option<Block<'_>>) -> Result<Value, CallError> {
        (**self).invoke(request, block)
    }
}

impl<T: Invoke + ?Sized> Invoke for &T {
    fn invoke(&self, request: &Request, block: Option<Block<'_>>) -> Result<Value, CallError> {
        (**self).invoke(request, block)
    }
}

fn class_request(model: &str, message: &str, filter: Option<&Value>) -> Request {
    let request = Request::new(Value::Class(model.to_string()), message);
    match filter {
        Some(filter) => request.with_args(vec![filter.clone()]),
        None => request,
    }
}

fn expect_entity(message: &str, value: Value) -> Result<Option<EntityRef>, CallError> {
    match value {
        Value::Null => Ok(None),
        Value::Entity(e) => Ok(Some(e)),
        other => Err(CoreError::format(format!(
            "{} returned {}, expected a document",
            message,
            other.describe()
        ))
        .into()),
    }
}

fn expect_count(message: &str, value: &Value) -> Result<u64, CallError> {
    value
        .as_int()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            CoreError::format(format!("{} returned {}, expected a count", message, value.describe()))
                .into()
        })
}

/// Class-level finders
pub trait Findable: Invoke {
    /// Count matching documents
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn count(&self, model: &str, filter: Option<&Value>) -> Result<u64, CallError> {
        let value = self.invoke(&class_request(model, "count", filter), None)?;
        expect_count("count", &value)
    }

    /// Whether any document matches
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn exists(&self, model: &str, filter: Option<&Value>) -> Result<bool, CallError> {
        match self.invoke(&class_request(model, "exists?", filter), None)? {
            Value::Bool(b) => Ok(b),
            other => Err(CoreError::format(format!("exists? returned {}", other.describe())).into()),
        }
    }

    /// Find by id (or array of ids)
    ///
    /// # Errors
    ///
    /// Propagates call failures, including not-found
    fn find(&self, model: &str, id: &Value) -> Result<Value, CallError> {
        let request = Request::new(Value::Class(model.to_string()), "find").with_args(vec![id.clone()]);
        self.invoke(&request, None)
    }

    /// First document matching a filter
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn find_by(&self, model: &str, filter: &Value) -> Result<Option<EntityRef>, CallError> {
        let value = self.invoke(&class_request(model, "find_by", Some(filter)), None)?;
        expect_entity("find_by", value)
    }

    /// First document in id order
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn first(&self, model: &str) -> Result<Option<EntityRef>, CallError> {
        let value = self.invoke(&class_request(model, "first", None), None)?;
        expect_entity("first", value)
    }

    /// Last document in id order
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn last(&self, model: &str) -> Result<Option<EntityRef>, CallError> {
        let value = self.invoke(&class_request(model, "last", None), None)?;
        expect_entity("last", value)
    }
}

/// Document creation
pub trait Creatable: Invoke {
    /// Create and persist a document
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn create(&self, model: &str, attributes: IndexMap<String, Value>) -> Result<EntityRef, CallError> {
        let request = Request::new(Value::Class(model.to_string()), "create")
            .with_args(vec![Value::Map(attributes)]);
        expect_entity("create", self.invoke(&request, None)?)?
            .ok_or_else(|| CoreError::format("create returned nil").into())
    }
}

/// Document removal
pub trait Deletable: Invoke {
    /// Delete one document
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn delete(&self, entity: &EntityRef) -> Result<bool, CallError> {
        let request = Request::new(Value::Entity(Arc::clone(entity)), "delete");
        match self.invoke(&request, None)? {
            Value::Bool(b) => Ok(b),
            other => Err(CoreError::format(format!("delete returned {}", other.describe())).into()),
        }
    }

    /// Delete every matching document
    ///
    /// # Errors
    ///
    /// Propagates call failures
    fn delete_all(&self, model: &str, filter: Option<&Value>) -> Result<u64, CallError> {
        let value = self.invoke(&class_request(model, "delete_all", filter), None)?;
        expect_count("delete_all", &value)
    }
}

impl<T: Invoke + ?Sized> Findable for T {}
impl<T: Invoke + ?Sized> Creatable for T {}
impl<T: Invoke + ?Sized> Deletable for T {}
