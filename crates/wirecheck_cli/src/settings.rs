//! Layered settings: built-in defaults, then an optional JSON file, then
//! command-line overrides applied by the caller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wirecheck_analyze::AnalyzerConfig;
use wirecheck_replay::ReplayConfig;
use wirecheck_store::StoreConfig;
use wirecheck_watch::{WatchList, WatcherConfig};

/// Settings file failure
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file could not be read
    #[error("cannot read settings {path}: {source}")]
    Read {
        /// Settings path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings JSON
    #[error("invalid settings {path}: {source}")]
    Parse {
        /// Settings path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the binary can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Recorder options
    pub watcher: WatcherConfig,
    /// Operations recorded as top-level calls
    pub watch: WatchList,
    /// Replay options
    pub replay: ReplayConfig,
    /// Diff options
    pub analyzer: AnalyzerConfig,
    /// Store client options
    pub store: StoreConfig,
}

impl Settings {
    /// Defaults, overlaid with `path` when given
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
