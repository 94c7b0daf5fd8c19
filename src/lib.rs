//! PHPUnit Sync
//!
//! Discovers PHPUnit tests with Tree-sitter, keeps them in a stable identity
//! tree across edits, and maps PHPUnit's `--teamcity` output back onto that
//! tree as results stream in.

pub mod autoload;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod project;
pub mod request;
pub mod runner;
pub mod suites;
pub mod tree;
pub mod utils;

pub use correlator::{Correlator, ExecutionResult, ResultSink, TestStatus};
pub use error::{Error, Result};
pub use project::{ProjectContext, Workspace};
pub use tree::{NodeId, NodeKind, TestTree};
