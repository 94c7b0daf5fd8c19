use std::path::PathBuf;
use thiserror::Error;

/// Failures reading composer manifests, phpunit configuration and settings files.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to parse manifest '{path}': {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("failed to parse configuration '{path}': {message}")]
    InvalidConfiguration { path: PathBuf, message: String },

    #[error("invalid glob '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("failed to parse settings '{path}': {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("unsupported settings format: {format} (expected json or yaml)")]
    UnsupportedFormat { format: String },
}

impl ManifestError {
    pub fn invalid_manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_configuration(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_glob(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidGlob {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    pub fn invalid_settings(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_manifest_display() {
        let err = ManifestError::invalid_manifest("/app/composer.json", "expected value");
        assert_eq!(
            err.to_string(),
            "failed to parse manifest '/app/composer.json': expected value"
        );
    }

    #[test]
    fn test_unsupported_format_display() {
        let err = ManifestError::unsupported_format("toml");
        assert_eq!(
            err.to_string(),
            "unsupported settings format: toml (expected json or yaml)"
        );
    }
}
