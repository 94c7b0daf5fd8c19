use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to read runner output: {source}")]
    OutputRead { source: std::io::Error },

    #[error("could not determine PHPUnit version from output: {output}")]
    VersionProbeFailed { output: String },

    #[error("empty argument vector for {root}")]
    EmptyCommand { root: PathBuf },
}

impl RunnerError {
    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            source,
        }
    }

    pub fn version_probe_failed(output: impl Into<String>) -> Self {
        Self::VersionProbeFailed {
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_probe_failed_display() {
        let err = RunnerError::version_probe_failed("command not found");
        assert_eq!(
            err.to_string(),
            "could not determine PHPUnit version from output: command not found"
        );
    }
}
