//! Transport boundary: the point where a command leaves the process.

use crate::command::{Command, CommandFailed, CommandStarted, CommandSucceeded, Monitoring, Reply};
use crate::error::DeliveryError;
use std::sync::Arc;

/// Something that delivers commands to a server
pub trait Transport: Send + Sync {
    /// Server address, reported in command events
    fn address(&self) -> &str;

    /// Send a command and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns a delivery error if the command was not answered
    fn deliver(&self, command: &Command) -> Result<Reply, DeliveryError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn address(&self) -> &str {
        (**self).address()
    }

    fn deliver(&self, command: &Command) -> Result<Reply, DeliveryError> {
        (**self).deliver(command)
    }
}

/// Transport that publishes command events around each delivery
pub struct MonitoredTransport<T> {
    inner: T,
    monitoring: Arc<Monitoring>,
}

impl<T: Transport> MonitoredTransport<T> {
    /// Wrap a transport
    pub fn new(inner: T, monitoring: Arc<Monitoring>) -> Self {
        Self { inner, monitoring }
    }

    /// The event source this transport publishes to
    #[must_use]
    pub fn monitoring(&self) -> &Arc<Monitoring> {
        &self.monitoring
    }
}

impl<T: Transport> Transport for MonitoredTransport<T> {
    fn address(&self) -> &str {
        self.inner.address()
    }

    fn deliver(&self, command: &Command) -> Result<Reply, DeliveryError> {
        let operation_id = self.monitoring.next_operation_id();
        let address = self.inner.address().to_string();
        self.monitoring.publish_started(&CommandStarted {
            operation_id,
            address: address.clone(),
            command: command.clone(),
        });

        match self.inner.deliver(command) {
            Ok(reply) => {
                self.monitoring.publish_succeeded(&CommandSucceeded {
                    operation_id,
                    address,
                    command_name: command.name().to_string(),
                    reply: reply.clone(),
                });
                Ok(reply)
            }
            Err(err) => {
                self.monitoring.publish_failed(&CommandFailed {
                    operation_id,
                    address,
                    command_name: command.name().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
