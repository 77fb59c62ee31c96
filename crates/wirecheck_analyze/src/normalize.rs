//! Command normalization for deterministic comparison.

use crate::config::AnalyzerConfig;
use serde_json::Value;
use std::collections::BTreeMap;

/// Strips volatile fields and masks generated identifiers
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: AnalyzerConfig,
}

impl Normalizer {
    /// Create a normalizer with the default exclusion list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a normalizer with custom config
    #[must_use]
    pub const fn with_config(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Normalize a raw command payload
    ///
    /// A payload that is not JSON is kept as a string, so it still compares
    /// literally against the other side.
    #[must_use]
    pub fn normalize_payload(&self, payload: &str) -> Value {
        match serde_json::from_str(payload) {
            Ok(value) => self.normalize_command(value),
            Err(_) => Value::String(payload.to_string()),
        }
    }

    /// Normalize a command document
    ///
    /// Excluded fields are dropped at the top level only; identifiers are
    /// masked at every depth.
    #[must_use]
    pub fn normalize_command(&self, command: Value) -> Value {
        match command {
            Value::Object(mut map) => {
                map.retain(|key, _| !self.config.excluded_fields.iter().any(|f| f == key));
                self.normalize_value(Value::Object(map))
            }
            other => self.normalize_value(other),
        }
    }

    /// Mask identifiers and sort object keys recursively
    #[must_use]
    pub fn normalize_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                if self.is_identifier(&map) {
                    return Value::String(self.config.placeholder.clone());
                }
                let mut sorted = BTreeMap::new();
                for (k, v) in map {
                    sorted.insert(k, self.normalize_value(v));
                }
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.normalize_value(v)).collect())
            }
            other => other,
        }
    }

    fn is_identifier(&self, map: &serde_json::Map<String, Value>) -> bool {
        self.config
            .identifier_keys
            .iter()
            .any(|key| map.get(key).is_some_and(|v| !v.is_null() && *v != Value::Bool(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_strips_excluded_fields() {
        let normalizer = Normalizer::new();
        let command = json!({
            "find": "people",
            "filter": {},
            "$db": "test",
            "lsid": {"id": "abc"},
            "$clusterTime": {"clusterTime": 1},
            "txnNumber": 3,
            "signature": "x"
        });
        assert_eq!(
            normalizer.normalize_command(command),
            json!({"filter": {}, "find": "people"})
        );
    }

    #[test]
    fn test_excluded_fields_only_at_top_level() {
        let normalizer = Normalizer::new();
        let command = json!({"insert": "logs", "documents": [{"lsid": 1}]});
        assert_eq!(
            normalizer.normalize_command(command.clone()),
            command
        );
    }

    #[test]
    fn test_masks_identifiers_at_any_depth() {
        let normalizer = Normalizer::new();
        let a = json!({"find": "people", "filter": {"_id": {"$oid": "0000000000000000000000aa"}},
                       "ids": [{"$oid": "0000000000000000000000ab"}]});
        let b = json!({"find": "people", "filter": {"_id": {"$oid": "0000000000000000000000bb"}},
                       "ids": [{"$oid": "0000000000000000000000bc"}]});
        let na = normalizer.normalize_command(a);
        assert_eq!(na, normalizer.normalize_command(b));
        assert_eq!(na["filter"]["_id"], "<object-id>");
        assert_eq!(na["ids"][0], "<object-id>");
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let normalizer = Normalizer::new();
        assert_eq!(
            normalizer.normalize_payload(r#"{"find":"people","limit":1}"#),
            normalizer.normalize_payload(r#"{"limit":1,"find":"people"}"#)
        );
    }

    #[test]
    fn test_custom_exclusions() {
        let normalizer = Normalizer::with_config(AnalyzerConfig {
            excluded_fields: vec!["readConcern".into()],
            identifier_keys: vec!["$uuid".into()],
            placeholder: "<id>".into(),
        });
        let out = normalizer.normalize_command(json!({
            "find": "x",
            "readConcern": {"level": "local"},
            "lsid": {"id": {"$uuid": "1234"}}
        }));
        assert_eq!(out, json!({"find": "x", "lsid": {"id": "<id>"}}));
    }

    #[test]
    fn test_unparsable_payload_kept_verbatim() {
        assert_eq!(
            Normalizer::new().normalize_payload("not json"),
            Value::String("not json".into())
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z$]{0,6}".prop_map(Value::String),
            "[0-9a-f]{24}".prop_map(|hex| json!({ "$oid": hex })),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z$]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(command in arb_json()) {
            let normalizer = Normalizer::new();
            let once = normalizer.normalize_command(command);
            let twice = normalizer.normalize_command(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_identifier_values_never_matter(
            a in "[0-9a-f]{24}",
            b in "[0-9a-f]{24}",
            collection in "[a-z]{1,8}",
        ) {
            let normalizer = Normalizer::new();
            let left = json!({"delete": collection, "deletes": [{"q": {"_id": {"$oid": a}}, "limit": 1}]});
            let right = json!({"delete": collection, "deletes": [{"q": {"_id": {"$oid": b}}, "limit": 1}]});
            prop_assert_eq!(normalizer.normalize_command(left), normalizer.normalize_command(right));
        }
    }
}
