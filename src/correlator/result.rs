use serde::Serialize;

use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Started,
    Passed,
    Skipped,
    Ignored,
    Failed,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Started => "started",
            TestStatus::Passed => "passed",
            TestStatus::Skipped => "skipped",
            TestStatus::Ignored => "ignored",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
        }
    }

    /// Rank used when several datasets of one method report into one node.
    pub fn severity(&self) -> u8 {
        match self {
            TestStatus::Started => 0,
            TestStatus::Passed => 1,
            TestStatus::Skipped | TestStatus::Ignored => 2,
            TestStatus::Failed => 3,
            TestStatus::Error => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Started)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub node_id: NodeId,
    /// Test name as reported by the runner, dataset suffix included.
    pub name: String,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl ExecutionResult {
    pub fn new(node_id: NodeId, name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            node_id,
            name: name.into(),
            status,
            message: None,
            detail: None,
            file: None,
            line: None,
            duration_ms: 0,
            dataset: None,
            expected: None,
            actual: None,
        }
    }
}

/// Aggregate counters from the runner's closing summary line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub all_passed: bool,
    pub tests: u64,
    pub assertions: u64,
    pub errors: u64,
    pub failures: u64,
    pub warnings: u64,
    pub skipped: u64,
    pub incomplete: u64,
    pub risky: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Receives finalized results as the correlator produces them.
pub trait ResultSink {
    fn contains(&self, id: &NodeId) -> bool;

    /// Returns false when the result was dropped.
    fn apply(&mut self, result: ExecutionResult) -> bool;
}

/// Sink that accepts every result; used when no tree is attached.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub applied: Vec<ExecutionResult>,
}

impl ResultSink for CollectingSink {
    fn contains(&self, _id: &NodeId) -> bool {
        true
    }

    fn apply(&mut self, result: ExecutionResult) -> bool {
        self.applied.push(result);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(TestStatus::Error.severity() > TestStatus::Failed.severity());
        assert!(TestStatus::Failed.severity() > TestStatus::Skipped.severity());
        assert!(TestStatus::Passed.severity() > TestStatus::Started.severity());
        assert!(!TestStatus::Started.is_terminal());
        assert!(TestStatus::Ignored.is_terminal());
    }
}
