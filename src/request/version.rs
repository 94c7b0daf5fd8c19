use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// PHPUnit release, as printed by `phpunit --version` and the run banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunnerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RunnerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Finds the first `PHPUnit X.Y[.Z]` in `text`.
    pub fn parse(text: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"PHPUnit (\d+)\.(\d+)(?:\.(\d+))?").expect("valid version pattern")
        });

        let caps = pattern.captures(text)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
        })
    }

    /// PHPUnit 10 reworked event reporting and dataset naming.
    pub fn has_event_system(&self) -> bool {
        self.major >= 10
    }
}

impl Default for RunnerVersion {
    fn default() -> Self {
        Self::new(10, 0, 0)
    }
}

impl fmt::Display for RunnerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
