//! Store configuration.

use serde::{Deserialize, Serialize};

/// Command dialect spoken by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Dedicated `count` commands, bare finds
    #[default]
    V1,
    /// Counting through `aggregate`, projected existence checks, explicit
    /// update flags
    V2,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        })
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(format!("unknown dialect {:?} (expected v1 or v2)", other)),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database name, sent as `$db` with every command
    pub database: String,
    /// Command dialect
    pub dialect: Dialect,
    /// Attach a logical session id (`lsid`) to every command
    pub sessions: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "wirecheck_test".to_string(),
            dialect: Dialect::V1,
            sessions: true,
        }
    }
}
