//! Subcommand implementations, kept free of argument parsing and printing.

use crate::settings::Settings;
use color_eyre::eyre::{Result, WrapErr};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use wirecheck_analyze::{Analysis, Analyzer};
use wirecheck_core::{Monitoring, MonitoredTransport};
use wirecheck_log::{Action, EntryStream, WriterSink};
use wirecheck_replay::{ReplaySession, ReplaySummary, Replayer};
use wirecheck_serial::{CallRecord, Serializer};
use wirecheck_store::{Client, MemoryServer, Population, playground, populate, run_features};
use wirecheck_watch::{Instrumented, SuppressMode, Watcher};

/// What a recording run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    /// Documents created before recording started
    pub people: usize,
    /// Features exercised while recording
    pub features: usize,
    /// Commands answered by the store
    pub commands: u64,
}

/// Populate a fresh store, then record the feature workload to `output`
///
/// # Errors
///
/// Returns an error if the log cannot be written or a call fails
pub fn record(settings: &Settings, output: &Path) -> Result<RecordSummary> {
    let registry = playground()?;
    let sink = Arc::new(
        WriterSink::create(output).wrap_err_with(|| format!("cannot create {}", output.display()))?,
    );
    let watcher = Arc::new(
        Watcher::new(Serializer::new(registry.clone()))
            .with_sink(Arc::clone(&sink))
            .with_config(settings.watcher.clone()),
    );
    let monitoring = Arc::new(Monitoring::new());
    watcher.install(&monitoring);

    let server = Arc::new(MemoryServer::new());
    let transport = MonitoredTransport::new(Arc::clone(&server), monitoring);
    let client = Client::with_config(Arc::new(transport), registry, settings.store.clone());
    let api = Instrumented::with_watch_list(client, Arc::clone(&watcher), settings.watch.clone());

    let Population { people, .. } = watcher
        .suppress(SuppressMode::All, || populate(&api))
        .wrap_err("populating the store failed")?;
    let features = run_features(&api).wrap_err("feature workload failed")?;
    sink.flush()?;

    let summary = RecordSummary {
        people,
        features: features.len(),
        commands: server.stats().commands,
    };
    info!(dialect = %settings.store.dialect, features = summary.features, "recording written");
    Ok(summary)
}

/// Replay `input` against a client speaking the configured dialect,
/// writing the replayed commands to `output`
///
/// # Errors
///
/// Returns an error if either file cannot be opened or the log is malformed
pub fn replay(settings: &Settings, input: &Path, output: &Path) -> Result<ReplaySummary> {
    let file = File::open(input).wrap_err_with(|| format!("cannot open {}", input.display()))?;
    let registry = playground()?;
    let sink = Arc::new(
        WriterSink::create(output).wrap_err_with(|| format!("cannot create {}", output.display()))?,
    );
    let watcher = Arc::new(Watcher::new(Serializer::new(registry.clone())).with_sink(Arc::clone(&sink)));
    let monitoring = Arc::new(Monitoring::new());
    let session = ReplaySession::install(watcher, Arc::clone(&monitoring));

    let server = Arc::new(MemoryServer::new());
    let transport = session.intercept(MonitoredTransport::new(server, monitoring));
    let client = Client::with_config(Arc::new(transport), registry, settings.store.clone());
    let replayer = Replayer::with_config(client, Arc::clone(session.watcher()), settings.replay.clone());

    let summary = replayer
        .replay_reader(BufReader::new(file))
        .wrap_err_with(|| format!("replaying {} failed", input.display()))?;
    sink.flush()?;
    info!(dialect = %settings.store.dialect, calls = summary.calls, "replay written");
    Ok(summary)
}

/// Compare two recordings
///
/// # Errors
///
/// Returns an error if either file cannot be read
pub fn diff(settings: &Settings, first: &Path, second: &Path) -> Result<Analysis> {
    let analysis = Analyzer::with_config(settings.analyzer.clone()).compare_files(first, second)?;
    Ok(analysis)
}

/// One watched call as seen in a log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallInfo {
    /// Operation name from the `start` entry
    pub message: String,
    /// `command` entries
    pub commands: usize,
    /// `result` entries
    pub results: usize,
    /// Whether a `stop` entry closed the call
    pub stopped: bool,
}

/// Summarize a log per correlation id
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is malformed
pub fn inspect(input: &Path) -> Result<IndexMap<String, CallInfo>> {
    let file = File::open(input).wrap_err_with(|| format!("cannot open {}", input.display()))?;
    let mut stream = EntryStream::from_reader(BufReader::new(file));
    let mut calls: IndexMap<String, CallInfo> = IndexMap::new();

    while let Some((line, entry)) = stream.next_entry()? {
        let id = entry
            .correlation_id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();
        let call = calls.entry(id).or_default();
        match entry.action {
            Action::Start => {
                let record: CallRecord = entry
                    .decode()
                    .wrap_err_with(|| format!("line {}: undecodable call", line))?;
                call.message = record.message;
            }
            Action::Command => call.commands += 1,
            Action::Result => call.results += 1,
            Action::Stop => call.stopped = true,
        }
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecheck_analyze::DiffKind;
    use wirecheck_store::Dialect;

    fn settings(dialect: Dialect, capture_replies: bool) -> Settings {
        let mut settings = Settings::default();
        settings.store.dialect = dialect;
        settings.store.sessions = false;
        settings.watcher.capture_replies = capture_replies;
        settings
    }

    #[test]
    fn test_record_then_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("v1.log");
        let summary = record(&settings(Dialect::V1, true), &log).unwrap();
        assert_eq!(summary.people, 28);
        assert!(summary.commands > 0);

        let calls = inspect(&log).unwrap();
        assert!(calls.values().all(|call| call.stopped && call.commands >= 1));
        assert!(calls.values().all(|call| call.results == call.commands));
        assert_eq!(calls.values().next().unwrap().message, "count");
    }

    #[test]
    fn test_record_replay_diff() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("v1.log");
        let replayed = dir.path().join("v2.log");
        record(&settings(Dialect::V1, true), &original).unwrap();

        let summary = replay(&settings(Dialect::V2, false), &original, &replayed).unwrap();
        assert!(summary.calls > 0);
        assert_eq!(summary.commands_without_result, 0);

        let analysis = diff(&Settings::default(), &original, &replayed).unwrap();
        assert!(!analysis.is_clean());
        assert!(analysis.records.iter().all(|r| r.kind != DiffKind::LoneCommand));

        let same = dir.path().join("v1-again.log");
        replay(&settings(Dialect::V1, false), &original, &same).unwrap();
        assert!(diff(&Settings::default(), &original, &same).unwrap().is_clean());
    }

    #[test]
    fn test_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.log");
        let out = dir.path().join("out.log");
        assert!(inspect(&missing).is_err());
        assert!(replay(&Settings::default(), &missing, &out).is_err());
        assert!(diff(&Settings::default(), &missing, &out).is_err());
    }

    #[test]
    fn test_inspect_rejects_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bad.log");
        std::fs::write(&log, "start:a.1:{\"receiver\":42}\n").unwrap();
        assert!(inspect(&log).is_err());

        std::fs::write(&log, "nonsense\n").unwrap();
        assert!(inspect(&log).is_err());
    }
}
