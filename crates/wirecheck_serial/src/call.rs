//! Call descriptors: the payload of a `start` entry.

use crate::env::{DeserializeEnv, SerializeEnv};
use crate::serializer::{PassGuard, Serializer};
use crate::wire::{HydrationRecord, Serialized};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use wirecheck_core::{CoreResult, Request};

/// Serialized form of `receiver.message(args, kwargs, block?)`
///
/// Receiver and arguments share one environment, so an entity passed both
/// as receiver and as argument comes back as a single instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Receiver
    pub receiver: Serialized,
    /// Operation name
    pub message: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Serialized>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: IndexMap<String, Serialized>,
    /// Whether the caller supplied a continuation
    #[serde(default)]
    pub has_block: bool,
    /// Hydration records for every entity reachable from the call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<HydrationRecord>,
}

impl Serializer {
    /// Encode a watched call
    ///
    /// # Errors
    ///
    /// Same as [`Serializer::serialize`]
    pub fn encode_call(&self, request: &Request, has_block: bool) -> CoreResult<CallRecord> {
        let _pass = PassGuard::enter("encode_call")?;
        let mut env = SerializeEnv::new();
        let receiver = self.serialize_in(&request.receiver, &mut env)?;
        let args = request
            .args
            .iter()
            .map(|arg| self.serialize_in(arg, &mut env))
            .collect::<CoreResult<_>>()?;
        let mut kwargs = IndexMap::with_capacity(request.kwargs.len());
        for (name, value) in &request.kwargs {
            kwargs.insert(name.clone(), self.serialize_in(value, &mut env)?);
        }
        Ok(CallRecord {
            receiver,
            message: request.message.clone(),
            args,
            kwargs,
            has_block,
            entities: env.into_records()?,
        })
    }

    /// Rebuild a watched call; returns the request and whether it had a block
    ///
    /// # Errors
    ///
    /// Same as [`Serializer::deserialize`]
    pub fn decode_call(&self, record: &CallRecord) -> CoreResult<(Request, bool)> {
        let _pass = PassGuard::enter("decode_call")?;
        let mut env = DeserializeEnv::from_records(record.entities.iter().cloned())?;
        let receiver = self.deserialize_in(&record.receiver, &mut env)?;
        let mut request = Request::new(receiver, &record.message);
        for arg in &record.args {
            request.args.push(self.deserialize_in(arg, &mut env)?);
        }
        for (name, value) in &record.kwargs {
            request
                .kwargs
                .insert(name.clone(), self.deserialize_in(value, &mut env)?);
        }
        Ok((request, record.has_block))
    }
}
