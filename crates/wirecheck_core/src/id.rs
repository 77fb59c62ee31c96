//! Identifiers used by the recorder and the watched API.
//!
//! Correlation ids group one top-level watched call with every command it
//! triggers. Object ids are the generated document identifiers that the
//! analyzer replaces with a placeholder before comparing commands.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Correlation identifier - opaque, stable for one top-level watched call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an externally supplied identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Generator for correlation ids: `<process uuid>.<counter>`
///
/// The uuid is drawn once per generator, so ids never collide across
/// processes or restarts. The counter is the only state shared between
/// threads and is guarded by its own lock.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    prefix: Uuid,
    next: Mutex<u64>,
}

impl CorrelationIdGenerator {
    /// Create a generator with a fresh random prefix
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Uuid::new_v4())
    }

    /// Create a generator with a fixed prefix
    #[must_use]
    pub const fn with_prefix(prefix: Uuid) -> Self {
        Self {
            prefix,
            next: Mutex::new(1),
        }
    }

    /// The process-unique prefix
    #[must_use]
    pub const fn prefix(&self) -> Uuid {
        self.prefix
    }

    /// Allocate the next id
    pub fn next_id(&self) -> CorrelationId {
        let mut next = self
            .next
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = CorrelationId(format!("{}.{}", self.prefix, *next));
        *next += 1;
        id
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation identifier handed out by the command event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get as u64
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op_{}", self.0)
    }
}

static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generated document identifier (12 bytes, rendered as 24 hex digits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a new id: 4-byte timestamp, 4-byte process counter, 4
    /// random bytes
    ///
    /// Ids generated by one process sort in creation order.
    #[must_use]
    pub fn new() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as u32);
        let count = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed) as u32;
        let random = Uuid::new_v4();
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..8].copy_from_slice(&count.to_be_bytes());
        bytes[8..].copy_from_slice(&random.as_bytes()[..4]);
        Self(bytes)
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Parse from 24 hex digits
    ///
    /// # Errors
    ///
    /// Returns a format error if the input is not 12 hex-encoded bytes
    pub fn parse_hex(s: &str) -> CoreResult<Self> {
        let decoded =
            hex::decode(s).map_err(|e| CoreError::format(format!("object id {:?}: {}", s, e)))?;
        let bytes: [u8; 12] = decoded
            .try_into()
            .map_err(|_| CoreError::format(format!("object id {:?}: expected 12 bytes", s)))?;
        Ok(Self(bytes))
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Render as 24 hex digits
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Extended JSON form used inside commands: `{"$oid": "..."}`
    #[must_use]
    pub fn to_extended_json(&self) -> serde_json::Value {
        serde_json::json!({ "$oid": self.to_hex() })
    }

    /// Read the extended JSON form back
    #[must_use]
    pub fn from_extended_json(value: &serde_json::Value) -> Option<Self> {
        value
            .get("$oid")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| Self::parse_hex(s).ok())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for ObjectId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_correlation_ids_are_sequential() {
        let generator = CorrelationIdGenerator::with_prefix(Uuid::nil());
        assert_eq!(
            generator.next_id().as_str(),
            "00000000-0000-0000-0000-000000000000.1"
        );
        assert_eq!(
            generator.next_id().as_str(),
            "00000000-0000-0000-0000-000000000000.2"
        );
    }

    #[test]
    fn test_generators_do_not_collide() {
        let a = CorrelationIdGenerator::new();
        let b = CorrelationIdGenerator::new();
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn test_correlation_ids_unique_across_threads() {
        let generator = Arc::new(CorrelationIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..250).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::parse_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_object_id_rejects_bad_hex() {
        assert!(ObjectId::parse_hex("xyz").unwrap_err().is_format());
        assert!(ObjectId::parse_hex("abcd").unwrap_err().is_format());
    }

    #[test]
    fn test_object_id_extended_json() {
        let id = ObjectId::from_bytes([7u8; 12]);
        let json = id.to_extended_json();
        assert_eq!(json["$oid"], "070707070707070707070707");
        assert_eq!(ObjectId::from_extended_json(&json), Some(id));
    }

    #[test]
    fn test_object_ids_differ() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn test_object_ids_sort_in_creation_order() {
        let ids: Vec<ObjectId> = (0..64).map(|_| ObjectId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort_by_key(ObjectId::to_hex);
        assert_eq!(ids, sorted);
    }

    proptest! {
        #[test]
        fn prop_hex_form_is_lowercase_and_exact(bytes in any::<[u8; 12]>()) {
            let id = ObjectId::from_bytes(bytes);
            let hex = id.to_hex();
            prop_assert_eq!(hex.len(), 24);
            prop_assert_eq!(&hex, &hex.to_lowercase());
            prop_assert_eq!(ObjectId::parse_hex(&hex.to_uppercase()).unwrap(), id);
            prop_assert_eq!(ObjectId::from_extended_json(&id.to_extended_json()), Some(id));
        }
    }
}
