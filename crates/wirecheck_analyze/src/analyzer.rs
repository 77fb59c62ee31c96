//! Per-correlation comparison of two command logs.

use crate::config::AnalyzerConfig;
use crate::normalize::Normalizer;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use wirecheck_log::{Action, LogEntry};

/// Analyzer failure; divergence between logs is never an error
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    /// A log could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        /// Log path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },
}

/// Which log a record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The recorded run
    First,
    /// The replayed run
    Second,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::First => "first run",
            Self::Second => "second run",
        })
    }
}

/// Commands of one log, grouped by correlation id in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLog {
    commands: IndexMap<String, Vec<String>>,
    skipped: usize,
}

impl CommandLog {
    /// Group the `command` entries of `lines`; unparsable lines are skipped
    /// and counted
    pub fn from_lines<S: AsRef<str>>(lines: impl IntoIterator<Item = S>) -> Self {
        let mut log = Self::default();
        for (index, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            match LogEntry::parse(line) {
                Ok(entry) if entry.action == Action::Command => {
                    let id = entry
                        .correlation_id
                        .map(|id| id.as_str().to_string())
                        .unwrap_or_default();
                    log.commands.entry(id).or_default().push(entry.payload);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(line = index + 1, error = %err, "skipping unparsable log line");
                    log.skipped += 1;
                }
            }
        }
        log
    }

    /// Read and group a log from a reader
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails
    pub fn from_reader(reader: impl BufRead) -> std::io::Result<Self> {
        let lines = reader.lines().collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self::from_lines(lines))
    }

    /// Read and group a log file
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzeError::Io`] if the file cannot be read
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalyzeError> {
        let path = path.as_ref();
        let io = |source| AnalyzeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::open(path).map_err(io)?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(io)
    }

    /// Commands recorded under a correlation id
    #[must_use]
    pub fn commands(&self, correlation_id: &str) -> Option<&[String]> {
        self.commands.get(correlation_id).map(Vec::as_slice)
    }

    /// Correlation ids in first-seen order
    pub fn correlation_ids(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Number of distinct correlation ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Unparsable lines that were skipped
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Kind of divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// A correlation id appears in only one log
    LoneCommand,
    /// Both logs have the id, with a different number of commands
    DifferentCounts,
    /// Commands at the same position differ after normalization
    DifferentCommands,
}

impl std::fmt::Display for DiffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::LoneCommand => "lone_command",
            Self::DifferentCounts => "different_counts",
            Self::DifferentCommands => "different_commands",
        })
    }
}

/// Raw commands involved in a divergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiffDetail {
    /// Commands of the only log holding the id
    Lone {
        /// Log the id was found in
        origin: Side,
        /// Its commands
        commands: Vec<String>,
    },
    /// Both full lists
    Counts {
        /// Commands from the first log
        first: Vec<String>,
        /// Commands from the second log
        second: Vec<String>,
    },
    /// The mismatching pair
    Commands {
        /// Position within the correlation's command list
        index: usize,
        /// Command from the first log
        first: String,
        /// Command from the second log
        second: String,
    },
}

/// One reported divergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRecord {
    /// Kind of divergence
    pub kind: DiffKind,
    /// Correlation id it concerns (empty for unscoped commands)
    pub correlation_id: String,
    /// Human-readable summary
    pub message: String,
    /// Raw, non-normalized commands
    pub detail: DiffDetail,
}

/// Differences plus parsing statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Divergences in report order
    pub records: Vec<DiffRecord>,
    /// Correlation ids compared
    pub compared: usize,
    /// Unparsable lines skipped in the first log
    pub skipped_first: usize,
    /// Unparsable lines skipped in the second log
    pub skipped_second: usize,
}

impl Analysis {
    /// Whether the two runs agree
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.records.is_empty()
    }
}

/// Compares two command logs
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    normalizer: Normalizer,
}

impl Analyzer {
    /// Create an analyzer with the default exclusion list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an analyzer with custom config
    #[must_use]
    pub const fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            normalizer: Normalizer::with_config(config),
        }
    }

    /// The normalizer in use
    #[must_use]
    pub const fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Divergences between two grouped logs
    ///
    /// Lone ids of the first log come first, then lone ids of the second,
    /// then count and content mismatches in first-seen order.
    #[must_use]
    pub fn differences(&self, first: &CommandLog, second: &CommandLog) -> Vec<DiffRecord> {
        let mut records = Vec::new();
        for (log, other, side) in [(first, second, Side::First), (second, first, Side::Second)] {
            for (id, commands) in &log.commands {
                if !other.commands.contains_key(id) {
                    records.push(DiffRecord {
                        kind: DiffKind::LoneCommand,
                        correlation_id: id.clone(),
                        message: format!("watch {} only exists in the {}", id, side),
                        detail: DiffDetail::Lone {
                            origin: side,
                            commands: commands.clone(),
                        },
                    });
                }
            }
        }

        for (id, ours) in &first.commands {
            let Some(theirs) = second.commands.get(id) else {
                continue;
            };
            if ours.len() != theirs.len() {
                records.push(DiffRecord {
                    kind: DiffKind::DifferentCounts,
                    correlation_id: id.clone(),
                    message: format!(
                        "watch {} has different command counts {} vs {}",
                        id,
                        ours.len(),
                        theirs.len()
                    ),
                    detail: DiffDetail::Counts {
                        first: ours.clone(),
                        second: theirs.clone(),
                    },
                });
                continue;
            }
            for (index, (a, b)) in ours.iter().zip(theirs).enumerate() {
                if self.normalizer.normalize_payload(a) != self.normalizer.normalize_payload(b) {
                    records.push(DiffRecord {
                        kind: DiffKind::DifferentCommands,
                        correlation_id: id.clone(),
                        message: format!("watch {} has different commands", id),
                        detail: DiffDetail::Commands {
                            index,
                            first: a.clone(),
                            second: b.clone(),
                        },
                    });
                }
            }
        }
        debug!(differences = records.len(), "comparison complete");
        records
    }

    /// Compare two grouped logs, keeping parse statistics
    #[must_use]
    pub fn analyze(&self, first: &CommandLog, second: &CommandLog) -> Analysis {
        let compared = first
            .correlation_ids()
            .chain(second.correlation_ids().filter(|id| first.commands(id).is_none()))
            .count();
        Analysis {
            records: self.differences(first, second),
            compared,
            skipped_first: first.skipped(),
            skipped_second: second.skipped(),
        }
    }

    /// Compare two log files
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzeError::Io`] if either file cannot be read
    pub fn compare_files(
        &self,
        first: impl AsRef<Path>,
        second: impl AsRef<Path>,
    ) -> Result<Analysis, AnalyzeError> {
        let first = CommandLog::from_path(first)?;
        let second = CommandLog::from_path(second)?;
        Ok(self.analyze(&first, &second))
    }
}
