//! Turns a chunked PHPUnit `--teamcity` stream into per-test results.
//!
//! Every open test is tracked under a correlation key derived from its
//! location hint. Events that arrive for a key with nothing open are
//! rejected explicitly rather than silently applied.

mod escape;
mod line_buffer;
mod location;
mod protocol;
mod result;

pub use escape::{last_location, unescape};
pub use line_buffer::LineBuffer;
pub use location::LocationHint;
pub use protocol::{parse_line, parse_service_message, ProtocolEvent, ServiceMessage};
pub use result::{CollectingSink, ExecutionResult, ResultSink, RunSummary, TestStatus};

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, trace, warn};

use crate::config::PathMapper;
use crate::request::RunnerVersion;
use crate::tree::NodeId;

const UNFINISHED_MESSAGE: &str = "runner output ended before the test finished";

/// Observable effect of one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Opened { id: NodeId, superseded: bool },
    Annotated { id: NodeId, status: TestStatus },
    Closed(ExecutionResult),
    /// A failed, ignored or finished event with no open test of that name.
    Rejected { event: &'static str, name: String },
    /// A started event whose hint did not resolve to a known node.
    Orphaned { name: String },
    Summary(RunSummary),
    Fatal(String),
}

#[derive(Debug)]
struct OpenResult {
    flow_id: Option<String>,
    result: ExecutionResult,
}

#[derive(Debug, Default)]
pub struct Correlator {
    buffer: LineBuffer,
    paths: PathMapper,
    open: BTreeMap<LocationHint, OpenResult>,
    results: Vec<ExecutionResult>,
    summary: Option<RunSummary>,
    fatal: Option<String>,
    version: Option<RunnerVersion>,
    resources: Option<(String, String)>,
    expected_tests: Option<u64>,
    cancelled: bool,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlator that maps remote paths in location hints back to local ones.
    pub fn with_paths(paths: PathMapper) -> Self {
        Self {
            paths,
            ..Self::default()
        }
    }

    /// Consumes one chunk of output. Chunk boundaries carry no meaning.
    pub fn feed<S: ResultSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> Vec<Transition> {
        if self.cancelled {
            return Vec::new();
        }
        self.buffer
            .push(chunk)
            .iter()
            .filter_map(|line| self.process_line(line, sink))
            .collect()
    }

    /// Flushes the trailing partial line once the stream has ended and
    /// finalizes tests the runner never closed as errors.
    pub fn finish<S: ResultSink + ?Sized>(&mut self, sink: &mut S) -> Vec<Transition> {
        if self.cancelled {
            return Vec::new();
        }

        let mut transitions = Vec::new();
        if let Some(line) = self.buffer.finish() {
            transitions.extend(self.process_line(&line, sink));
        }

        if !self.open.is_empty() {
            warn!(open = self.open.len(), "runner output ended with unfinished tests");
            transitions.extend(
                self.finalize_open(UNFINISHED_MESSAGE, sink)
                    .into_iter()
                    .map(Transition::Closed),
            );
        }
        transitions
    }

    /// Stops expecting further events. Results applied so far stay valid.
    pub fn cancel(&mut self) {
        if !self.open.is_empty() {
            debug!(open = self.open.len(), "discarding unfinished tests on cancel");
        }
        self.open.clear();
        self.cancelled = true;
    }

    /// True once a summary or fatal line was seen (or the run was cancelled)
    /// and no test remains open.
    pub fn is_idle(&self) -> bool {
        self.scanning_done() && self.open.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        self.results
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    pub fn version(&self) -> Option<RunnerVersion> {
        self.version
    }

    pub fn expected_tests(&self) -> Option<u64> {
        self.expected_tests
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn scanning_done(&self) -> bool {
        self.cancelled || self.summary.is_some() || self.fatal.is_some()
    }

    /// Handles one complete line.
    pub fn process_line<S: ResultSink + ?Sized>(&mut self, line: &str, sink: &mut S) -> Option<Transition> {
        if self.scanning_done() {
            trace!(line, "ignoring output after end of run");
            return None;
        }

        let Some(event) = parse_line(line) else {
            trace!(line, "unrecognised output line");
            return None;
        };

        match event {
            ProtocolEvent::TestStarted(message) => Some(self.on_started(message, sink)),
            ProtocolEvent::TestFailed(message) => Some(self.on_failed(message)),
            ProtocolEvent::TestIgnored(message) => Some(self.on_ignored(message)),
            ProtocolEvent::TestFinished(message) => Some(self.on_finished(message, sink)),
            ProtocolEvent::TestCount(count) => {
                self.expected_tests = Some(count);
                None
            }
            ProtocolEvent::SuiteStarted(message) => {
                debug!(suite = message.test_name(), "suite started");
                None
            }
            ProtocolEvent::SuiteFinished(message) => {
                debug!(suite = message.test_name(), "suite finished");
                None
            }
            ProtocolEvent::Summary(mut summary) => {
                if let Some((time, memory)) = self.resources.take() {
                    summary.time = Some(time);
                    summary.memory = Some(memory);
                }
                debug!(tests = summary.tests, assertions = summary.assertions, "run summary");
                self.summary = Some(summary.clone());
                Some(Transition::Summary(summary))
            }
            ProtocolEvent::Fatal(message) => {
                warn!(%message, "runner aborted");
                self.finalize_open(&message, sink);
                self.fatal = Some(message.clone());
                Some(Transition::Fatal(message))
            }
            ProtocolEvent::Version(version) => {
                self.version = Some(version);
                None
            }
            ProtocolEvent::Resources { time, memory } => {
                self.resources = Some((time, memory));
                None
            }
        }
    }

    fn on_started<S: ResultSink + ?Sized>(&mut self, message: ServiceMessage, sink: &mut S) -> Transition {
        let name = message.test_name().to_string();
        let Some(hint) = message
            .get("locationHint")
            .and_then(|hint| LocationHint::parse(hint, &name, &self.paths))
        else {
            debug!(%name, "started event without a usable location hint");
            return Transition::Orphaned { name };
        };

        let id = hint.node_id();
        if !sink.contains(&id) {
            debug!(%id, "started event for unknown node");
            return Transition::Orphaned { name };
        }

        let mut result = ExecutionResult::new(id.clone(), name, TestStatus::Started);
        result.dataset = hint.dataset.clone();
        sink.apply(result.clone());

        let superseded = self
            .open
            .insert(
                hint,
                OpenResult {
                    flow_id: message.flow_id().map(str::to_string),
                    result,
                },
            )
            .is_some();
        if superseded {
            debug!(%id, "unterminated result superseded");
        }
        Transition::Opened { id, superseded }
    }

    fn on_failed(&mut self, message: ServiceMessage) -> Transition {
        let Some(open) = self.find_open(&message) else {
            return rejected("testFailed", &message);
        };

        let result = &mut open.result;
        let text = message.get("message").unwrap_or_default().to_string();
        result.status = classify_failure(&text);
        result.message = Some(text).filter(|m| !m.is_empty());

        if let Some(detail) = message.get("details").map(str::trim).filter(|d| !d.is_empty()) {
            if let Some((file, line)) = last_location(detail) {
                result.file = Some(file);
                result.line = Some(line);
            }
            result.detail = Some(detail.to_string());
        }
        result.expected = message.get("expected").map(str::to_string);
        result.actual = message.get("actual").map(str::to_string);
        if let Some(duration) = message.duration_ms() {
            result.duration_ms = duration;
        }

        Transition::Annotated {
            id: result.node_id.clone(),
            status: result.status,
        }
    }

    fn on_ignored(&mut self, message: ServiceMessage) -> Transition {
        let Some(open) = self.find_open(&message) else {
            return rejected("testIgnored", &message);
        };

        let result = &mut open.result;
        let text = message.get("message").unwrap_or_default().to_string();
        result.status = classify_ignored(&text);
        result.message = Some(text).filter(|m| !m.is_empty());
        if let Some(detail) = message.get("details").map(str::trim).filter(|d| !d.is_empty()) {
            result.detail = Some(detail.to_string());
        }
        if let Some(duration) = message.duration_ms() {
            result.duration_ms = duration;
        }

        Transition::Annotated {
            id: result.node_id.clone(),
            status: result.status,
        }
    }

    fn on_finished<S: ResultSink + ?Sized>(&mut self, message: ServiceMessage, sink: &mut S) -> Transition {
        let Some(key) = self.find_open_key(&message) else {
            return rejected("testFinished", &message);
        };
        let Some(OpenResult { mut result, .. }) = self.open.remove(&key) else {
            return rejected("testFinished", &message);
        };

        if result.status == TestStatus::Started {
            result.status = TestStatus::Passed;
        }
        if let Some(duration) = message.duration_ms() {
            result.duration_ms = duration;
        }

        sink.apply(result.clone());
        self.results.push(result.clone());
        Transition::Closed(result)
    }

    fn find_open_key(&self, message: &ServiceMessage) -> Option<LocationHint> {
        let name = message.test_name();
        let flow_id = message.flow_id();
        self.open
            .iter()
            .find(|(_, open)| {
                open.result.name == name
                    && match (flow_id, open.flow_id.as_deref()) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            })
            .map(|(key, _)| key.clone())
    }

    fn find_open(&mut self, message: &ServiceMessage) -> Option<&mut OpenResult> {
        let key = self.find_open_key(message)?;
        self.open.get_mut(&key)
    }

    fn finalize_open<S: ResultSink + ?Sized>(&mut self, message: &str, sink: &mut S) -> Vec<ExecutionResult> {
        let open = std::mem::take(&mut self.open);
        open.into_values()
            .map(|OpenResult { mut result, .. }| {
                result.status = TestStatus::Error;
                result.message = Some(message.to_string());
                sink.apply(result.clone());
                self.results.push(result.clone());
                result
            })
            .collect()
    }
}

fn rejected(event: &'static str, message: &ServiceMessage) -> Transition {
    let name = message.test_name().to_string();
    debug!(event, %name, "no open test for event");
    Transition::Rejected { event, name }
}

fn exception_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\\?(?:[A-Za-z_][\w\\]*)?(?:Exception|Error):").expect("valid exception pattern")
    })
}

/// Failures caused by a thrown exception or engine error count as errors,
/// assertion failures as failed.
fn classify_failure(message: &str) -> TestStatus {
    if exception_pattern().is_match(message.trim_start()) {
        TestStatus::Error
    } else {
        TestStatus::Failed
    }
}

fn classify_ignored(message: &str) -> TestStatus {
    if message.to_ascii_lowercase().contains("incomplete") {
        TestStatus::Ignored
    } else {
        TestStatus::Skipped
    }
}
