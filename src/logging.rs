//! Subscriber setup for the CLI.
//!
//! The library logs under `phpunit_sync_core` and the binary under
//! `phpunit_sync`. Both targets get the same level; everything else
//! (tree-sitter, dependencies) stays at the subscriber default of off.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

const LIBRARY_TARGET: &str = "phpunit_sync_core";
const BINARY_TARGET: &str = "phpunit_sync";

/// How much the CLI reports, from `-q` up to `-vvv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors only, and nothing written.
    Quiet,
    /// Warnings: skipped files, ambiguous mappings, unfinished runs.
    Normal,
    /// Discovery and runner lifecycle.
    Verbose,
    /// Per-file sync and protocol transitions.
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, 2) => Self::Debug,
            (false, _) => Self::Trace,
        }
    }

    pub fn level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::WARN,
            Self::Verbose => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }

    /// Filter directives covering the library and the binary.
    pub fn directives(self) -> String {
        let level = self.level();
        format!("{LIBRARY_TARGET}={level},{BINARY_TARGET}={level}")
    }

    fn shows_locations(self) -> bool {
        self >= Self::Debug
    }
}

/// Installs the global subscriber on stderr, keeping stdout for results.
/// A set `RUST_LOG` replaces the flag-derived directives.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity.shows_locations())
        .with_file(verbosity.shows_locations())
        .with_line_number(verbosity.shows_locations())
        .compact();

    match verbosity {
        Verbosity::Quiet => builder.with_writer(std::io::sink).init(),
        Verbosity::Normal => builder.without_time().init(),
        _ => builder.init(),
    }
}
