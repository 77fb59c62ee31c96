//! Replay engine.
//!
//! The recorded stream is consumed one session at a time:
//!
//! 1. Scanning: the next entry must be `start`; end of stream is terminal.
//! 2. Draining: every `command`/`result` pair (and any `stop`) following the
//!    `start` is consumed, and each recorded reply is queued for the thread.
//!    A `stop` is skipped whatever its correlation id: nested calls close
//!    before the call that contains them.
//! 3. Replaying: the call descriptor is rebuilt and invoked under the
//!    original correlation id with interception enabled. The rebuilt entity
//!    graph is released once the call returns.
//!
//! A malformed line or a grammar violation aborts the whole replay.

use crate::state;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wirecheck_core::{CallError, CoreError, CorrelationId, Invoke, Reply, Value};
use wirecheck_log::{Action, EntryStream, LogEntry};
use wirecheck_serial::CallRecord;
use wirecheck_watch::Watcher;

/// Replay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Stop at the first replayed call that fails for a reason other than
    /// interception
    pub stop_on_error: bool,
    /// Treat a `command` not followed by its `result` as a malformed stream
    pub require_results: bool,
    /// Maximum entries to consume (0 = unlimited)
    pub max_entries: usize,
}

/// Replay failure
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The stream could not be read or parsed
    #[error(transparent)]
    Stream(CoreError),

    /// An entry was well-formed but could not be replayed
    #[error("line {line}: {source}")]
    Entry {
        /// 1-based line of the offending entry
        line: usize,
        /// Underlying failure
        #[source]
        source: CoreError,
    },

    /// A replayed call failed and `stop_on_error` is set
    #[error("line {line}: replayed {message} failed: {source}")]
    Call {
        /// 1-based line of the `start` entry
        line: usize,
        /// Operation name
        message: String,
        /// Failure returned by the API
        #[source]
        source: CallError,
    },
}

impl ReplayError {
    fn entry(line: usize, source: CoreError) -> Self {
        Self::Entry { line, source }
    }

    fn grammar(line: usize, reason: impl Into<String>) -> Self {
        Self::entry(line, CoreError::state(reason))
    }

    /// The core failure behind this error, if any
    #[must_use]
    pub const fn core(&self) -> Option<&CoreError> {
        match self {
            Self::Stream(err) | Self::Entry { source: err, .. } => Some(err),
            Self::Call { .. } => None,
        }
    }
}

/// What a replay did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Entries consumed
    pub entries: usize,
    /// Top-level calls replayed
    pub calls: usize,
    /// Calls that ran to completion
    pub completed: usize,
    /// Calls cut short by interception
    pub aborted: usize,
    /// Calls that failed for another reason
    pub failed: usize,
    /// Recorded replies queued for substitution
    pub results_queued: usize,
    /// Queued replies the call never asked for
    pub results_unused: usize,
    /// Recorded commands with no reply to substitute
    pub commands_without_result: usize,
}

/// Replays recorded sessions against a live API
pub struct Replayer<A> {
    api: A,
    watcher: Arc<Watcher>,
    config: ReplayConfig,
}

impl<A: Invoke> Replayer<A> {
    /// Create a replayer; commands are recorded by `watcher`
    pub fn new(api: A, watcher: Arc<Watcher>) -> Self {
        Self::with_config(api, watcher, ReplayConfig::default())
    }

    /// Create a replayer with explicit configuration
    pub fn with_config(api: A, watcher: Arc<Watcher>, config: ReplayConfig) -> Self {
        Self { api, watcher, config }
    }

    /// Current configuration
    pub const fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// The API calls are replayed against
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Replay every session read from `reader`
    ///
    /// # Errors
    ///
    /// See [`Replayer::replay`]
    pub fn replay_reader<R: BufRead>(&self, reader: R) -> Result<ReplaySummary, ReplayError> {
        self.replay(&mut EntryStream::from_reader(reader))
    }

    /// Replay every session in `stream`
    ///
    /// # Errors
    ///
    /// Returns an error for an unreadable or malformed line, an entry out of
    /// place, an undecodable call descriptor, or (with `stop_on_error`) a
    /// failing call
    pub fn replay<I>(&self, stream: &mut EntryStream<I>) -> Result<ReplaySummary, ReplayError>
    where
        I: Iterator<Item = std::io::Result<String>>,
    {
        let mut summary = ReplaySummary::default();

        loop {
            if self.config.max_entries > 0 && stream.consumed() >= self.config.max_entries {
                info!(entries = stream.consumed(), "entry limit reached");
                break;
            }
            let Some((line, entry)) = stream.next_entry().map_err(ReplayError::Stream)? else {
                break;
            };
            if entry.action != Action::Start {
                return Err(ReplayError::grammar(
                    line,
                    format!("expected start, found {}", entry.action),
                ));
            }
            let id = entry
                .correlation_id
                .clone()
                .ok_or_else(|| ReplayError::grammar(line, "start entry has no correlation id"))?;

            state::clear();
            self.drain(stream, &id, &mut summary)?;
            self.replay_call(line, &id, &entry, &mut summary)?;

            let unused = state::clear();
            if unused > 0 {
                debug!(correlation_id = %id, unused, "recorded replies left unused");
                summary.results_unused += unused;
            }
        }

        summary.entries = stream.consumed();
        info!(
            calls = summary.calls,
            aborted = summary.aborted,
            failed = summary.failed,
            "replay finished"
        );
        Ok(summary)
    }

    fn drain<I>(
        &self,
        stream: &mut EntryStream<I>,
        id: &CorrelationId,
        summary: &mut ReplaySummary,
    ) -> Result<(), ReplayError>
    where
        I: Iterator<Item = std::io::Result<String>>,
    {
        loop {
            match stream.peek_entry().map_err(ReplayError::Stream)? {
                None => return Ok(()),
                Some(next) if next.action == Action::Start => return Ok(()),
                Some(_) => {}
            }
            let Some((line, entry)) = stream.next_entry().map_err(ReplayError::Stream)? else {
                return Ok(());
            };
            // A stop may close an enclosing call whose nested calls were
            // recorded first.
            if entry.action != Action::Stop && entry.correlation_id.as_ref() != Some(id) {
                return Err(ReplayError::grammar(
                    line,
                    format!(
                        "{} entry for {} interleaved into session {}",
                        entry.action,
                        entry.correlation_id.as_ref().map_or("<none>", CorrelationId::as_str),
                        id
                    ),
                ));
            }

            match entry.action {
                Action::Stop => {}
                Action::Result => {
                    return Err(ReplayError::grammar(line, "result without a preceding command"));
                }
                Action::Command => {
                    let answered = matches!(
                        stream.peek_entry().map_err(ReplayError::Stream)?,
                        Some(next) if next.action == Action::Result
                    );
                    if answered {
                        if let Some((result_line, result)) =
                            stream.next_entry().map_err(ReplayError::Stream)?
                        {
                            Self::queue_result(result_line, &result, id)?;
                            summary.results_queued += 1;
                        }
                    } else if self.config.require_results {
                        return Err(ReplayError::grammar(
                            line,
                            "command is not followed by its result",
                        ));
                    } else {
                        summary.commands_without_result += 1;
                    }
                }
                Action::Start => {
                    return Err(ReplayError::grammar(line, "start consumed while draining"));
                }
            }
        }
    }

    fn queue_result(line: usize, entry: &LogEntry, id: &CorrelationId) -> Result<(), ReplayError> {
        if entry.correlation_id.as_ref() != Some(id) {
            return Err(ReplayError::grammar(line, format!("result does not belong to {}", id)));
        }
        let reply: Reply = entry.decode().map_err(|e| ReplayError::entry(line, e))?;
        state::enqueue(reply);
        Ok(())
    }

    fn replay_call(
        &self,
        line: usize,
        id: &CorrelationId,
        entry: &LogEntry,
        summary: &mut ReplaySummary,
    ) -> Result<(), ReplayError> {
        let record: CallRecord = entry.decode().map_err(|e| ReplayError::entry(line, e))?;
        let (request, has_block) = self
            .watcher
            .serializer()
            .decode_call(&record)
            .map_err(|e| ReplayError::entry(line, e))?;
        summary.calls += 1;
        debug!(correlation_id = %id, message = %request.message, queued = state::queued(), "replaying call");

        let outcome = state::replaying(|| {
            self.watcher.with_correlation(id.clone(), || {
                if has_block {
                    let mut ignore = |_: &Value| {};
                    self.api.invoke(&request, Some(&mut ignore))
                } else {
                    self.api.invoke(&request, None)
                }
            })
        });
        request.release_relations();

        match outcome {
            Ok(_) => summary.completed += 1,
            Err(err) if err.is_aborted() => summary.aborted += 1,
            Err(err) => {
                summary.failed += 1;
                warn!(correlation_id = %id, message = %request.message, error = %err, "replayed call failed");
                if self.config.stop_on_error {
                    return Err(ReplayError::Call {
                        line,
                        message: request.message,
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{Interceptor, ReplaySession};
    use std::sync::{Mutex, Weak};
    use wirecheck_core::{
        Block, Command, DeliveryError, Entity, EntitySchema, Monitoring, RelationDef, RelationKind,
        Request, Transport, TypeRegistry,
    };
    use wirecheck_log::MemorySink;
    use wirecheck_serial::Serializer;

    struct Unreachable;

    impl Transport for Unreachable {
        fn address(&self) -> &str {
            "unreachable"
        }

        fn deliver(&self, _command: &Command) -> Result<Reply, DeliveryError> {
            Err(DeliveryError::Io { reason: "no network in tests".into() })
        }
    }

    /// `find` sends one command; `destroy_all` sends a find and then one
    /// delete per returned document; `explode` fails outright; `reload`
    /// remembers its receiver and whether its team was loaded
    struct Api {
        transport: Interceptor<Unreachable>,
        reloaded: Mutex<Vec<(Weak<Entity>, bool)>>,
    }

    impl Invoke for Api {
        fn invoke(&self, request: &Request, _block: Option<Block<'_>>) -> Result<Value, CallError> {
            match request.message.as_str() {
                "find" => {
                    let command = Command::new("find", "people").with("filter", serde_json::json!({}));
                    let reply = self.transport.deliver(&command)?;
                    Ok(Value::Int(reply.first_batch().len() as i64))
                }
                "destroy_all" => {
                    let reply = self.transport.deliver(&Command::new("find", "people"))?;
                    for doc in reply.first_batch() {
                        self.transport.deliver(&Command::new("delete", "people").with("q", doc))?;
                    }
                    Ok(Value::Int(0))
                }
                "reload" => {
                    if let Some(entity) = request.receiver.as_entity() {
                        let team_loaded = entity.relation("team").is_some();
                        self.reloaded.lock().unwrap().push((Arc::downgrade(entity), team_loaded));
                    }
                    Ok(request.receiver.clone())
                }
                "explode" => Err(CallError::Argument {
                    message: "explode".into(),
                    reason: "always fails".into(),
                }),
                _ => Err(CallError::NoMethod {
                    receiver: request.receiver.describe(),
                    message: request.message.clone(),
                }),
            }
        }
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with_types([
                EntitySchema::new("Person", "people")
                    .with_relation("team", RelationDef::new(RelationKind::One, "Team")),
                EntitySchema::new("Team", "teams")
                    .with_relation("members", RelationDef::new(RelationKind::Many, "Person")),
            ])
            .unwrap()
    }

    fn replayer(sink: &Arc<MemorySink>, config: ReplayConfig) -> Replayer<Api> {
        let watcher = Watcher::new(Serializer::new(registry())).with_sink(Arc::clone(sink));
        let session = ReplaySession::install(Arc::new(watcher), Arc::new(Monitoring::new()));
        let api = Api {
            transport: session.intercept(Unreachable),
            reloaded: Mutex::new(Vec::new()),
        };
        Replayer::with_config(api, Arc::clone(session.watcher()), config)
    }

    const FIND_START: &str = r#"start:abc.1:{"receiver":{"kind":"atomic","data":{"type":"class","value":"Person"}},"message":"find","args":[],"kwargs":{},"has_block":false}"#;
    const FIND_COMMAND: &str = r#"command:abc.1:{"find":"people","filter":{}}"#;

    fn start(id: &str, message: &str, has_block: bool) -> String {
        format!(
            r#"start:{}:{{"receiver":{{"kind":"atomic","data":{{"type":"class","value":"Person"}}}},"message":"{}","has_block":{}}}"#,
            id, message, has_block
        )
    }

    #[test]
    fn test_command_without_result_is_replayed_and_aborted() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let mut stream = EntryStream::from_lines([FIND_START, FIND_COMMAND, "stop:abc.1:"]);

        let summary = replayer.replay(&mut stream).unwrap();
        assert_eq!(summary.calls, 1);
        assert_eq!(summary.aborted, 1);
        assert_eq!(summary.commands_without_result, 1);
        assert_eq!(summary.entries, 3);
        assert_eq!(sink.lines(), vec![FIND_COMMAND.to_string()]);
    }

    #[test]
    fn test_recorded_results_are_substituted() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let lines = vec![
            start("d.1", "destroy_all", false),
            r#"command:d.1:{"find":"people"}"#.to_string(),
            r#"result:d.1:{"cursor":{"firstBatch":[{"_id":1},{"_id":2}],"id":0},"ok":1}"#.to_string(),
            r#"command:d.1:{"delete":"people","q":{"_id":1}}"#.to_string(),
            r#"result:d.1:{"n":1,"ok":1}"#.to_string(),
            r#"command:d.1:{"delete":"people","q":{"_id":2}}"#.to_string(),
            r#"result:d.1:{"n":1,"ok":1}"#.to_string(),
            "stop:d.1:".to_string(),
        ];

        let summary = replayer.replay(&mut EntryStream::from_lines(lines)).unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.results_queued, 3);
        assert_eq!(summary.results_unused, 0);
        assert_eq!(sink.lines().len(), 3);
        assert!(sink.lines()[2].contains(r#""q":{"_id":2}"#));
    }

    #[test]
    fn test_unused_results_do_not_leak_into_next_call() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let lines = vec![
            start("e.1", "explode", false),
            r#"command:e.1:{"find":"people"}"#.to_string(),
            r#"result:e.1:{"cursor":{"firstBatch":[{"_id":1}],"id":0},"ok":1}"#.to_string(),
            "stop:e.1:".to_string(),
            start("e.2", "find", false),
            "stop:e.2:".to_string(),
        ];

        let summary = replayer.replay(&mut EntryStream::from_lines(lines)).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results_unused, 1);
        assert_eq!(summary.aborted, 1);
    }

    #[test]
    fn test_stop_on_error() {
        let sink = Arc::new(MemorySink::new());
        let config = ReplayConfig { stop_on_error: true, ..ReplayConfig::default() };
        let replayer = replayer(&sink, config);
        let lines = vec![start("e.1", "explode", false), "stop:e.1:".to_string()];
        let err = replayer.replay(&mut EntryStream::from_lines(lines)).unwrap_err();
        assert!(matches!(err, ReplayError::Call { line: 1, .. }));
    }

    #[test]
    fn test_require_results() {
        let sink = Arc::new(MemorySink::new());
        let config = ReplayConfig { require_results: true, ..ReplayConfig::default() };
        let replayer = replayer(&sink, config);
        let err = replayer
            .replay(&mut EntryStream::from_lines([FIND_START, FIND_COMMAND, "stop:abc.1:"]))
            .unwrap_err();
        assert!(matches!(err, ReplayError::Entry { line: 2, .. }));
        assert!(err.core().unwrap().is_state());
    }

    #[test]
    fn test_grammar_violations_are_fatal() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());

        let err = replayer
            .replay(&mut EntryStream::from_lines([FIND_COMMAND]))
            .unwrap_err();
        assert!(matches!(err, ReplayError::Entry { line: 1, .. }));

        let err = replayer
            .replay(&mut EntryStream::from_lines([FIND_START, r#"result:abc.1:{"ok":1}"#]))
            .unwrap_err();
        assert!(err.core().unwrap().is_state());

        let err = replayer
            .replay(&mut EntryStream::from_lines([FIND_START, r#"command:zzz.9:{"find":"x"}"#]))
            .unwrap_err();
        assert!(err.to_string().contains("interleaved"));

        let err = replayer
            .replay(&mut EntryStream::from_lines([FIND_START, "bogus line"]))
            .unwrap_err();
        assert!(matches!(err, ReplayError::Stream(_)));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_enclosing_stop_after_nested_call() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let lines = vec![
            start("n.1", "find", true),
            r#"command:n.1:{"find":"people","filter":{}}"#.to_string(),
            start("n.2", "find", false),
            r#"command:n.2:{"find":"people","filter":{}}"#.to_string(),
            "stop:n.2:".to_string(),
            "stop:n.1:".to_string(),
            start("n.3", "find", false),
            "stop:n.3:".to_string(),
        ];

        let summary = replayer.replay(&mut EntryStream::from_lines(lines)).unwrap();
        assert_eq!(summary.calls, 3);
        assert_eq!(summary.aborted, 3);
        assert_eq!(summary.entries, 8);
        let ids: Vec<String> = sink
            .lines()
            .iter()
            .map(|l| LogEntry::parse(l).unwrap().correlation_id.unwrap().as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["n.1", "n.2", "n.3"]);
    }

    #[test]
    fn test_replayed_entity_graph_is_released() {
        let person = Entity::new("Person", "p1");
        let team = Entity::new("Team", "t1");
        person.set_relation("team", Value::Entity(Arc::clone(&team)));
        team.set_relation("members", Value::Array(vec![Value::Entity(Arc::clone(&person))]));
        let receiver = Value::Entity(person);
        let record = Serializer::new(registry())
            .encode_call(&Request::new(receiver.clone(), "reload"), false)
            .unwrap();
        receiver.release_relations();
        let line = format!("start:g.1:{}", serde_json::to_string(&record).unwrap());

        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let summary = replayer
            .replay(&mut EntryStream::from_lines(vec![line, "stop:g.1:".to_string()]))
            .unwrap();
        assert_eq!(summary.completed, 1);

        let reloaded = replayer.api().reloaded.lock().unwrap();
        assert_eq!(reloaded.len(), 1);
        let (hydrated, team_loaded) = &reloaded[0];
        assert!(*team_loaded);
        assert!(hydrated.upgrade().is_none());
    }

    #[test]
    fn test_undecodable_call_is_fatal() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let renamed = r#"start:r.1:{"receiver":{"kind":"atomic","data":{"type":"class","value":"Employee"}},"message":"find"}"#;
        let err = replayer.replay(&mut EntryStream::from_lines([renamed])).unwrap_err();
        assert!(err.core().unwrap().is_lookup());

        let garbled = r#"start:r.2:{"receiver":42}"#;
        let err = replayer.replay(&mut EntryStream::from_lines([garbled])).unwrap_err();
        assert!(err.core().unwrap().is_format());
    }

    #[test]
    fn test_block_presence_is_replayed() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let lines = vec![start("b.1", "find", true), "stop:b.1:".to_string()];
        let summary = replayer.replay(&mut EntryStream::from_lines(lines)).unwrap();
        assert_eq!(summary.calls, 1);
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn test_max_entries() {
        let sink = Arc::new(MemorySink::new());
        let config = ReplayConfig { max_entries: 2, ..ReplayConfig::default() };
        let replayer = replayer(&sink, config);
        let lines = vec![
            start("m.1", "find", false),
            "stop:m.1:".to_string(),
            start("m.2", "find", false),
            "stop:m.2:".to_string(),
        ];
        let summary = replayer.replay(&mut EntryStream::from_lines(lines)).unwrap();
        assert_eq!(summary.calls, 1);
        assert_eq!(summary.entries, 2);
    }

    #[test]
    fn test_replay_reader() {
        let sink = Arc::new(MemorySink::new());
        let replayer = replayer(&sink, ReplayConfig::default());
        let text = format!("{}\n{}\nstop:abc.1:\n", FIND_START, FIND_COMMAND);
        let summary = replayer.replay_reader(text.as_bytes()).unwrap();
        assert_eq!(summary.calls, 1);
        assert!(!state::is_replaying());
    }
}
