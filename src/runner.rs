//! Launches PHPUnit and streams its output through a [`Correlator`].

use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::Settings;
use crate::correlator::{parse_line, Correlator, ExecutionResult, LineBuffer, ProtocolEvent, ResultSink, RunSummary};
use crate::error::RunnerError;
use crate::request::RunnerVersion;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 8 * 1024;

/// Shared flag that stops a running invocation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RunOutcome {
    /// The runner printed its summary.
    Completed,
    /// A fatal error ended the run early.
    Aborted { message: String },
    Cancelled,
    /// Output ended without a summary or a recognised fatal error.
    Incomplete { exit_code: Option<i32> },
}

impl RunOutcome {
    /// Outcome of a stream the correlator has seen to its end. `exit_code` is
    /// the runner's status, when there was a process.
    pub fn of(correlator: &Correlator, exit_code: Option<i32>) -> Self {
        if correlator.is_cancelled() {
            RunOutcome::Cancelled
        } else if let Some(message) = correlator.fatal() {
            RunOutcome::Aborted {
                message: message.to_string(),
            }
        } else if correlator.summary().is_some() {
            RunOutcome::Completed
        } else {
            RunOutcome::Incomplete { exit_code }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub results: Vec<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<RunnerVersion>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum Chunk {
    Data(Stream, Vec<u8>),
    Failed(Stream, std::io::Error),
}

/// Asks PHPUnit for its version.
pub fn probe_version(settings: &Settings, root: &Path) -> Result<RunnerVersion, RunnerError> {
    let mut args: Vec<String> = settings.command.clone();
    if !settings.php.is_empty() {
        args.push(settings.php.clone());
    }
    args.push(settings.phpunit.clone());
    args.push("--version".to_string());

    let (program, rest) = args
        .split_first()
        .ok_or_else(|| RunnerError::EmptyCommand { root: root.to_path_buf() })?;

    debug!(?args, "probing runner version");
    let output = Command::new(program)
        .args(rest)
        .current_dir(root)
        .output()
        .map_err(|e| RunnerError::spawn_failed(program, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    RunnerVersion::parse(&stdout).ok_or_else(|| {
        let stderr = String::from_utf8_lossy(&output.stderr);
        RunnerError::version_probe_failed(format!("{}{}", stdout.trim(), stderr.trim()))
    })
}

/// Runs `args` in `root`, feeding stdout into `correlator` as it arrives.
///
/// Fatal error lines on stderr are forwarded to the correlator as well,
/// since PHP may print them there depending on `display_errors`.
pub fn run<S: ResultSink + ?Sized>(
    args: &[String],
    root: &Path,
    mut correlator: Correlator,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<RunReport, RunnerError> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| RunnerError::EmptyCommand { root: root.to_path_buf() })?;

    info!(?args, root = %root.display(), "starting runner");
    let mut child = Command::new(program)
        .args(rest)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RunnerError::spawn_failed(program, e))?;

    let (tx, rx) = mpsc::channel();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stderr_lines = LineBuffer::new();
    let mut stderr_text = String::new();
    let mut read_error = None;

    // Readers are detached: after a cancel, grandchildren may keep the pipes
    // open long after the direct child is gone.
    if let Some(stdout) = stdout {
        let tx = tx.clone();
        thread::spawn(move || pump(stdout, Stream::Stdout, tx));
    }
    if let Some(stderr) = stderr {
        let tx = tx.clone();
        thread::spawn(move || pump(stderr, Stream::Stderr, tx));
    }
    drop(tx);

    loop {
        if cancel.is_cancelled() {
            info!("run cancelled");
            kill(&mut child);
            correlator.cancel();
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Chunk::Data(Stream::Stdout, bytes)) => {
                for transition in correlator.feed(&bytes, sink) {
                    trace!(?transition, "transition");
                }
            }
            Ok(Chunk::Data(Stream::Stderr, bytes)) => {
                for line in stderr_lines.push(&bytes) {
                    forward_fatal(&line, &mut correlator, sink);
                    stderr_text.push_str(&line);
                    stderr_text.push('\n');
                }
            }
            Ok(Chunk::Failed(stream, e)) => {
                warn!(?stream, error = %e, "failed reading runner output");
                if stream == Stream::Stdout {
                    read_error = Some(e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(rx);

    if let Some(line) = stderr_lines.finish() {
        forward_fatal(&line, &mut correlator, sink);
        stderr_text.push_str(&line);
    }

    let status = child.wait().map_err(|source| RunnerError::OutputRead { source })?;
    if let Some(source) = read_error {
        return Err(RunnerError::OutputRead { source });
    }
    correlator.finish(sink);

    let outcome = RunOutcome::of(&correlator, status.code());
    if matches!(outcome, RunOutcome::Incomplete { .. }) {
        warn!(code = ?status.code(), "runner exited without a summary");
    }
    debug!(?outcome, code = ?status.code(), "runner finished");

    let summary = correlator.summary().cloned();
    let version = correlator.version();
    Ok(RunReport {
        outcome,
        results: correlator.into_results(),
        summary,
        version,
        stderr: stderr_text,
    })
}

fn pump<R: Read>(mut reader: R, stream: Stream, tx: Sender<Chunk>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Chunk::Data(stream, buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                let _ = tx.send(Chunk::Failed(stream, e));
                break;
            }
        }
    }
}

fn forward_fatal<S: ResultSink + ?Sized>(line: &str, correlator: &mut Correlator, sink: &mut S) {
    if matches!(parse_line(line), Some(ProtocolEvent::Fatal(_))) {
        correlator.process_line(line, sink);
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "runner already exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::CollectingSink;
    use std::time::Instant;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_outcome_without_summary_is_incomplete() {
        let mut sink = CollectingSink::default();
        let mut correlator = Correlator::new();
        correlator.feed(b"##teamcity[testCount count='3']\n", &mut sink);
        correlator.finish(&mut sink);
        assert_eq!(RunOutcome::of(&correlator, None), RunOutcome::Incomplete { exit_code: None });

        let mut completed = Correlator::new();
        completed.feed(b"OK (3 tests, 3 assertions)\n", &mut sink);
        assert_eq!(RunOutcome::of(&completed, Some(0)), RunOutcome::Completed);
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let mut sink = CollectingSink::default();
        let err = run(
            &[],
            Path::new("."),
            Correlator::new(),
            &mut sink,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCommand { .. }));
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let mut sink = CollectingSink::default();
        let args = vec!["phpunit-sync-definitely-missing-binary".to_string()];
        let err = run(
            &args,
            Path::new("."),
            Correlator::new(),
            &mut sink,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_streams_shell_output_into_correlator() {
        let script = "printf \"##teamcity[testStarted name='testA' locationHint='php_qn:///app/ATest.php::\\\\\\\\ATest::testA']\\n\"; \
                      printf \"##teamcity[testFinished name='testA' duration='3']\\nOK (1 test, 1 assertion)\\n\"";
        let args = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let mut sink = CollectingSink::default();

        let report = run(&args, Path::new("."), Correlator::new(), &mut sink, &CancellationToken::new()).unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].duration_ms, 3);
        assert_eq!(report.summary.map(|s| s.tests), Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_fatal_on_stderr_aborts() {
        let args = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'PHP Fatal error:  Uncaught Exception: boom' 1>&2; exit 255".to_string(),
        ];
        let mut sink = CollectingSink::default();

        let report = run(&args, Path::new("."), Correlator::new(), &mut sink, &CancellationToken::new()).unwrap();

        assert_eq!(
            report.outcome,
            RunOutcome::Aborted {
                message: "Uncaught Exception: boom".to_string()
            }
        );
        assert!(report.stderr.contains("PHP Fatal error"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_mid_run_returns_without_waiting_for_grandchildren() {
        let script = "printf \"##teamcity[testCount count='1']\\n\"; sleep 4; echo done";
        let args = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let token = CancellationToken::new();
        let trigger = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let mut sink = CollectingSink::default();

        let started = Instant::now();
        let report = run(&args, Path::new("."), Correlator::new(), &mut sink, &token).unwrap();
        canceller.join().unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_before_start_reports_cancelled() {
        let args = vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
        let token = CancellationToken::new();
        token.cancel();
        let mut sink = CollectingSink::default();

        let report = run(&args, Path::new("."), Correlator::new(), &mut sink, &token).unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(report.results.is_empty());
    }
}
