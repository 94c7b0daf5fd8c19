//! Line classification for PHPUnit's `--teamcity` output.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::escape::unescape;
use super::result::RunSummary;
use crate::request::RunnerVersion;

/// One recognised line of runner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    TestStarted(ServiceMessage),
    TestFailed(ServiceMessage),
    TestIgnored(ServiceMessage),
    TestFinished(ServiceMessage),
    TestCount(u64),
    SuiteStarted(ServiceMessage),
    SuiteFinished(ServiceMessage),
    Summary(RunSummary),
    Fatal(String),
    Version(RunnerVersion),
    Resources { time: String, memory: String },
}

/// Attributes of a `##teamcity[...]` message, already unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMessage {
    pub name: String,
    pub attributes: HashMap<String, String>,
}

impl ServiceMessage {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn test_name(&self) -> &str {
        self.get("name").unwrap_or_default()
    }

    pub fn flow_id(&self) -> Option<&str> {
        self.get("flowId")
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let raw = self.get("duration")?;
        raw.parse::<u64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|ms| ms.max(0.0).round() as u64))
    }
}

fn service_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*##teamcity\[([A-Za-z]+)(.*)\]\s*$").expect("valid service pattern")
    })
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z][\w-]*)='((?:\|.|[^|'])*)'").expect("valid attribute pattern")
    })
}

fn passed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^OK \((\d+) tests?, (\d+) assertions?\)").expect("valid summary pattern")
    })
}

fn counts_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Tests: (\d+), Assertions: (\d+)(.*)$").expect("valid summary pattern")
    })
}

fn counter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z][A-Za-z ]*?): (\d+)").expect("valid counter pattern")
    })
}

fn fatal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:PHP )?(?:Fatal error|Parse error):\s*(.+)$").expect("valid fatal pattern")
    })
}

fn resources_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Time: ([^,]+), Memory: (.+)$").expect("valid resources pattern")
    })
}

/// Classifies a single complete line. Unrecognised lines yield `None`.
///
/// Service messages are tried first, then the summary forms, then fatal
/// errors. Banner and resource lines are informational.
pub fn parse_line(line: &str) -> Option<ProtocolEvent> {
    if let Some(message) = parse_service_message(line) {
        return classify_service_message(message);
    }

    let trimmed = line.trim();
    if let Some(summary) = parse_summary(trimmed) {
        return Some(ProtocolEvent::Summary(summary));
    }
    if let Some(caps) = fatal_pattern().captures(trimmed) {
        return Some(ProtocolEvent::Fatal(caps[1].trim().to_string()));
    }
    if trimmed.starts_with("PHPUnit ") {
        return RunnerVersion::parse(trimmed).map(ProtocolEvent::Version);
    }
    if let Some(caps) = resources_pattern().captures(trimmed) {
        return Some(ProtocolEvent::Resources {
            time: caps[1].trim().to_string(),
            memory: caps[2].trim().to_string(),
        });
    }

    None
}

fn classify_service_message(message: ServiceMessage) -> Option<ProtocolEvent> {
    let event = match message.name.as_str() {
        "testStarted" => ProtocolEvent::TestStarted(message),
        "testFailed" => ProtocolEvent::TestFailed(message),
        "testIgnored" => ProtocolEvent::TestIgnored(message),
        "testFinished" => ProtocolEvent::TestFinished(message),
        "testSuiteStarted" => ProtocolEvent::SuiteStarted(message),
        "testSuiteFinished" => ProtocolEvent::SuiteFinished(message),
        "testCount" => ProtocolEvent::TestCount(message.get("count")?.parse().ok()?),
        _ => return None,
    };
    Some(event)
}

pub fn parse_service_message(line: &str) -> Option<ServiceMessage> {
    let caps = service_pattern().captures(line)?;
    let attributes = attribute_pattern()
        .captures_iter(&caps[2])
        .map(|attr| (attr[1].to_string(), unescape(&attr[2])))
        .collect();

    Some(ServiceMessage {
        name: caps[1].to_string(),
        attributes,
    })
}

fn parse_summary(line: &str) -> Option<RunSummary> {
    if let Some(caps) = passed_pattern().captures(line) {
        return Some(RunSummary {
            all_passed: true,
            tests: caps[1].parse().ok()?,
            assertions: caps[2].parse().ok()?,
            ..RunSummary::default()
        });
    }

    let caps = counts_pattern().captures(line)?;
    let mut summary = RunSummary {
        all_passed: false,
        tests: caps[1].parse().ok()?,
        assertions: caps[2].parse().ok()?,
        ..RunSummary::default()
    };

    for counter in counter_pattern().captures_iter(&caps[3]) {
        let Ok(value) = counter[2].parse::<u64>() else {
            continue;
        };
        match counter[1].trim() {
            "Errors" => summary.errors = value,
            "Failures" => summary.failures = value,
            "Warnings" => summary.warnings = value,
            "Skipped" => summary.skipped = value,
            "Incomplete" => summary.incomplete = value,
            "Risky" => summary.risky = value,
            _ => {}
        }
    }

    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_started_message() {
        let line = "##teamcity[testStarted name='testBar' locationHint='php_qn:///app/tests/FooTest.php::\\App\\FooTest::testBar' flowId='4242']";
        let Some(ProtocolEvent::TestStarted(message)) = parse_line(line) else {
            panic!("expected testStarted");
        };
        assert_eq!(message.test_name(), "testBar");
        assert_eq!(message.flow_id(), Some("4242"));
        assert_eq!(
            message.get("locationHint"),
            Some("php_qn:///app/tests/FooTest.php::\\App\\FooTest::testBar")
        );
    }

    #[test]
    fn test_parse_failed_message_unescapes() {
        let line = "##teamcity[testFailed name='testBar' message='Failed asserting that |'a|' is true.' details=' /app/tests/FooTest.php:12|n ' duration='3']";
        let Some(ProtocolEvent::TestFailed(message)) = parse_line(line) else {
            panic!("expected testFailed");
        };
        assert_eq!(message.get("message"), Some("Failed asserting that 'a' is true."));
        assert_eq!(message.get("details"), Some(" /app/tests/FooTest.php:12"));
        assert_eq!(message.duration_ms(), Some(3));
    }

    #[test]
    fn test_parse_fractional_duration() {
        let message = parse_service_message("##teamcity[testFinished name='t' duration='1.6']")
            .expect("service message");
        assert_eq!(message.duration_ms(), Some(2));
    }

    #[test]
    fn test_parse_test_count() {
        assert_eq!(
            parse_line("##teamcity[testCount count='7' flowId='1']"),
            Some(ProtocolEvent::TestCount(7))
        );
    }

    #[test]
    fn test_parse_all_passed_summary() {
        let Some(ProtocolEvent::Summary(summary)) = parse_line("OK (3 tests, 5 assertions)") else {
            panic!("expected summary");
        };
        assert!(summary.all_passed);
        assert_eq!(summary.tests, 3);
        assert_eq!(summary.assertions, 5);
    }

    #[test]
    fn test_parse_failed_summary() {
        let line = "Tests: 6, Assertions: 5, Errors: 1, Failures: 2, PHPUnit Deprecations: 1, Skipped: 1, Incomplete: 1.";
        let Some(ProtocolEvent::Summary(summary)) = parse_line(line) else {
            panic!("expected summary");
        };
        assert!(!summary.all_passed);
        assert_eq!(summary.tests, 6);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.incomplete, 1);
    }

    #[test]
    fn test_parse_fatal() {
        assert_eq!(
            parse_line("PHP Fatal error:  Uncaught Error: Class \"Foo\" not found in /app/x.php:3"),
            Some(ProtocolEvent::Fatal(
                "Uncaught Error: Class \"Foo\" not found in /app/x.php:3".to_string()
            ))
        );
        assert!(matches!(
            parse_line("Parse error: syntax error, unexpected '}'"),
            Some(ProtocolEvent::Fatal(_))
        ));
    }

    #[test]
    fn test_parse_banner_and_resources() {
        assert!(matches!(
            parse_line("PHPUnit 10.5.2 by Sebastian Bergmann and contributors."),
            Some(ProtocolEvent::Version(v)) if v.major == 10 && v.minor == 5
        ));
        assert_eq!(
            parse_line("Time: 00:00.012, Memory: 6.00 MB"),
            Some(ProtocolEvent::Resources {
                time: "00:00.012".to_string(),
                memory: "6.00 MB".to_string(),
            })
        );
    }

    #[test]
    fn test_unrecognised_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("FAILURES!"), None);
        assert_eq!(parse_line("##teamcity[customMessage name='x']"), None);
    }
}
