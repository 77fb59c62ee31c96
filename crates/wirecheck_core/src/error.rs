//! Core error types for wirecheck.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
///
/// The three variants are the failure classes shared by every component:
/// malformed input, unresolvable references, and grammar or scoping
/// violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed serialized payload or log line
    Format {
        /// What was wrong with the input
        reason: String,
    },

    /// Unresolvable type name, entity reference, or queued result
    Lookup {
        /// Kind of thing that was looked up
        kind: String,
        /// Name or key that failed to resolve
        name: String,
    },

    /// Conflicting environments or a stream violating the entry grammar
    State {
        /// Description of the violated expectation
        reason: String,
    },
}

impl CoreError {
    /// Shorthand for a format error
    pub fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Shorthand for a lookup error
    pub fn lookup(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Lookup {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Shorthand for a state error
    pub fn state(reason: impl Into<String>) -> Self {
        Self::State {
            reason: reason.into(),
        }
    }

    /// Whether this is a format error
    #[must_use]
    pub const fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// Whether this is a lookup error
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup { .. })
    }

    /// Whether this is a state error
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { reason } => write!(f, "Format error: {}", reason),
            Self::Lookup { kind, name } => write!(f, "{} not found: {}", kind, name),
            Self::State { reason } => write!(f, "Invalid state: {}", reason),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format {
            reason: err.to_string(),
        }
    }
}

/// Error returned by a transport instead of a server reply
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Delivery was intercepted and the rest of the call abandoned
    #[error("Delivery aborted by interception")]
    Aborted,

    /// The transport could not reach the server or got a bad reply
    #[error("Transport failure: {reason}")]
    Io {
        /// Failure description
        reason: String,
    },

    /// The server rejected the command
    #[error("Command failed: {message}")]
    Rejected {
        /// Server-side error message
        message: String,
    },
}

/// Error returned by a watched API call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The receiver does not respond to the message
    #[error("Undefined method {message} for {receiver}")]
    NoMethod {
        /// Receiver description
        receiver: String,
        /// Message name
        message: String,
    },

    /// Arguments did not fit the operation
    #[error("Invalid arguments for {message}: {reason}")]
    Argument {
        /// Message name
        message: String,
        /// What was wrong
        reason: String,
    },

    /// A document the call required does not exist
    #[error("Document not found: {type_name} {selector}")]
    NotFound {
        /// Domain type searched
        type_name: String,
        /// Selector used, rendered as JSON
        selector: String,
    },

    /// The transport failed or was intercepted
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// A core failure surfaced through the call
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CallError {
    /// Whether the call was abandoned by replay interception
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Delivery(DeliveryError::Aborted))
    }
}
