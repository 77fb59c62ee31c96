//! Log entry types and the line format.
//!
//! `ACTION:CORRELATION_ID:PAYLOAD` where the correlation id is empty when no
//! scope was active and the payload is empty for `stop`.

use serde::{Deserialize, Serialize};
use wirecheck_core::{CoreError, CoreResult, CorrelationId};

/// Field delimiter
pub const DELIMITER: char = ':';

/// Entry action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A top-level watched call began; payload is the call descriptor
    Start,
    /// A command was about to be sent; payload is the command document
    Command,
    /// The top-level watched call returned
    Stop,
    /// Reply to the preceding command; payload is the reply document
    Result,
}

impl Action {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Command => "command",
            Self::Stop => "stop",
            Self::Result => "result",
        }
    }

    /// Whether entries of this action carry a payload
    #[must_use]
    pub const fn has_payload(self) -> bool {
        !matches!(self, Self::Stop)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "command" => Ok(Self::Command),
            "stop" => Ok(Self::Stop),
            "result" => Ok(Self::Result),
            other => Err(CoreError::format(format!("unknown action {:?}", other))),
        }
    }
}

/// One line of a recorded session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// What happened
    pub action: Action,
    /// Scope the entry belongs to, if any
    pub correlation_id: Option<CorrelationId>,
    /// Single-line JSON payload (empty for `stop`)
    pub payload: String,
}

impl LogEntry {
    /// Create an entry
    pub fn new(action: Action, correlation_id: Option<CorrelationId>, payload: impl Into<String>) -> Self {
        Self {
            action,
            correlation_id,
            payload: payload.into(),
        }
    }

    /// Create a `stop` entry
    #[must_use]
    pub fn stop(correlation_id: Option<CorrelationId>) -> Self {
        Self::new(Action::Stop, correlation_id, String::new())
    }

    /// Build an entry whose payload is `value` encoded as single-line JSON
    ///
    /// # Errors
    ///
    /// Returns a format error if the value cannot be encoded
    pub fn encode<T: Serialize>(
        action: Action,
        correlation_id: Option<CorrelationId>,
        value: &T,
    ) -> CoreResult<Self> {
        Ok(Self::new(action, correlation_id, serde_json::to_string(value)?))
    }

    /// Decode the payload
    ///
    /// # Errors
    ///
    /// Returns a format error if the payload is missing or malformed
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> CoreResult<T> {
        if self.payload.is_empty() {
            return Err(CoreError::format(format!("{} entry has no payload", self.action)));
        }
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Render as a log line, without the trailing newline
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.action,
            DELIMITER,
            self.correlation_id.as_ref().map_or("", CorrelationId::as_str),
            DELIMITER,
            self.payload
        )
    }

    /// Parse a log line (a trailing newline is ignored)
    ///
    /// # Errors
    ///
    /// Returns a format error for an unknown action, missing fields, an
    /// embedded newline, or a missing payload on an action that needs one
    pub fn parse(line: &str) -> CoreResult<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.contains('\n') {
            return Err(CoreError::format("entry spans more than one line"));
        }

        let mut parts = line.splitn(3, DELIMITER);
        let action: Action = parts.next().unwrap_or_default().parse()?;
        let id = parts
            .next()
            .ok_or_else(|| CoreError::format(format!("{} entry has no correlation id field", action)))?;
        let payload = parts.next().unwrap_or_default();

        let payload = match (action.has_payload(), payload) {
            (true, "") => {
                return Err(CoreError::format(format!("{} entry has no payload", action)));
            }
            (false, "null") => "",
            (_, p) => p,
        };

        let correlation_id = if id.is_empty() {
            None
        } else {
            Some(CorrelationId::new(id))
        };
        Ok(Self::new(action, correlation_id, payload))
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}
