//! Project settings read from `.phpunit-sync.{json,yaml,yml}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ManifestError;
use crate::utils::{canonical_locator, normalize_path};

pub const SETTINGS_FILES: [&str; 3] = [".phpunit-sync.json", ".phpunit-sync.yaml", ".phpunit-sync.yml"];

const DEFAULT_EXCLUDED_DIRS: [&str; 3] = ["vendor", ".git", "node_modules"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Command prefix the whole invocation runs under (e.g. a container exec).
    pub command: Vec<String>,
    /// PHP binary. Empty runs the PHPUnit entry point directly.
    pub php: String,
    pub phpunit: String,
    /// Extra arguments passed to every run.
    pub args: Vec<String>,
    /// Explicit phpunit.xml, relative to the project root.
    pub configuration: Option<PathBuf>,
    /// Local path prefix to the path the runner sees.
    pub paths: BTreeMap<String, String>,
    pub excluded_dirs: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            php: "php".to_string(),
            phpunit: "vendor/bin/phpunit".to_string(),
            args: Vec::new(),
            configuration: None,
            paths: BTreeMap::new(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Loads a settings file, picking the format from its extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading settings");

        let content =
            fs::read_to_string(path).map_err(|e| ManifestError::invalid_settings(path, e.to_string()))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension {
            "json" => Self::parse_json(&content, path),
            "yaml" | "yml" => Self::parse_yaml(&content, path),
            _ => Err(ManifestError::unsupported_format(extension)),
        }
    }

    /// Settings from the first settings file in `root`, or the defaults.
    pub fn discover(root: &Path) -> Result<Self, ManifestError> {
        match SETTINGS_FILES.iter().map(|name| root.join(name)).find(|p| p.is_file()) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn parse_json(content: &str, path: &Path) -> Result<Self, ManifestError> {
        serde_json::from_str(content).map_err(|e| ManifestError::invalid_settings(path, e.to_string()))
    }

    pub fn parse_yaml(content: &str, path: &Path) -> Result<Self, ManifestError> {
        serde_yaml::from_str(content).map_err(|e| ManifestError::invalid_settings(path, e.to_string()))
    }

    /// Explicit configuration file resolved against `root`.
    pub fn configuration_path(&self, root: &Path) -> Option<PathBuf> {
        self.configuration
            .as_ref()
            .map(|configuration| normalize_path(&root.join(configuration)))
    }

    /// Path mapper with relative local prefixes resolved against `root`.
    pub fn path_mapper(&self, root: &Path) -> PathMapper {
        PathMapper::new(
            self.paths
                .iter()
                .map(|(local, remote)| (canonical_locator(&root.join(local)), remote.clone())),
        )
    }

    pub fn excluded_dirs(&self) -> Vec<&str> {
        self.excluded_dirs.iter().map(String::as_str).collect()
    }
}

/// Translates between the paths discovery sees and the paths the runner sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMapper {
    pairs: Vec<(String, String)>,
}

impl PathMapper {
    pub fn new<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(local, remote)| (trim_separator(&local), trim_separator(&remote)))
            .collect();
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_remote(&self, local: &Path) -> String {
        let local = canonical_locator(local);
        self.pairs
            .iter()
            .filter_map(|(from, to)| replace_prefix(&local, from, to).map(|mapped| (from.len(), mapped)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, mapped)| mapped)
            .unwrap_or(local)
    }

    pub fn to_local(&self, remote: &str) -> PathBuf {
        let remote = remote.replace('\\', "/");
        let mapped = self
            .pairs
            .iter()
            .filter_map(|(to, from)| replace_prefix(&remote, from, to).map(|mapped| (from.len(), mapped)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, mapped)| mapped)
            .unwrap_or(remote);
        PathBuf::from(mapped)
    }
}

fn trim_separator(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        path.to_string()
    } else {
        trimmed.to_string()
    }
}

fn replace_prefix(path: &str, from: &str, to: &str) -> Option<String> {
    let rest = path.strip_prefix(from)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(format!("{to}{rest}"))
    } else {
        None
    }
}
