//! Analyzer configuration.

use serde::{Deserialize, Serialize};

/// Which fields are volatile and how generated identifiers are masked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Top-level command fields dropped before comparison
    pub excluded_fields: Vec<String>,
    /// Keys marking a generated identifier; any object holding one is
    /// replaced by the placeholder
    pub identifier_keys: Vec<String>,
    /// Replacement for generated identifiers
    pub placeholder: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            excluded_fields: ["signature", "lsid", "$db", "$clusterTime", "txnNumber"]
                .into_iter()
                .map(String::from)
                .collect(),
            identifier_keys: vec!["$oid".to_string()],
            placeholder: "<object-id>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.excluded_fields.len(), 5);
        assert!(config.excluded_fields.iter().any(|f| f == "lsid"));
        assert_eq!(config.placeholder, "<object-id>");
    }

    #[test]
    fn test_partial_override() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"excluded_fields":["lsid"]}"#).unwrap();
        assert_eq!(config.excluded_fields, vec!["lsid".to_string()]);
        assert_eq!(config.identifier_keys, vec!["$oid".to_string()]);
    }
}
