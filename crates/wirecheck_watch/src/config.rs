//! Watcher configuration.

use serde::{Deserialize, Serialize};

/// Watcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Also emit a `result` entry for each successful command, so the
    /// recording carries replies a replay can substitute
    pub capture_replies: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: WatcherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, WatcherConfig::default());
        assert!(!config.capture_replies);
    }
}
