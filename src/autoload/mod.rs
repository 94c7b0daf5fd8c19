//! PSR-4 namespace mappings read from composer manifests.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::error::ManifestError;
use crate::utils::{is_under, normalize_entry, normalize_path};

pub const MANIFEST_FILE: &str = "composer.json";

const SECTIONS: &[(&str, bool)] = &[("autoload", false), ("autoload-dev", true)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceMapping {
    /// Namespace prefix without a leading separator; non-empty prefixes end with `\`.
    pub prefix: String,
    pub directory: PathBuf,
    pub manifest: PathBuf,
    pub dev: bool,
}

impl NamespaceMapping {
    pub fn new(prefix: &str, directory: impl Into<PathBuf>, manifest: impl Into<PathBuf>) -> Self {
        let prefix = prefix.trim_start_matches('\\');
        let prefix = if prefix.is_empty() || prefix.ends_with('\\') {
            prefix.to_string()
        } else {
            format!("{prefix}\\")
        };
        Self {
            prefix,
            directory: normalize_path(&directory.into()),
            manifest: manifest.into(),
            dev: false,
        }
    }

    /// Textual half of the mapping test.
    pub fn matches_namespace(&self, namespace: &str) -> bool {
        format!("{}\\", namespace.trim_matches('\\')).starts_with(&self.prefix)
    }

    /// Location half of the mapping test.
    pub fn contains_path(&self, path: &Path) -> bool {
        is_under(path, &self.directory)
    }

    pub fn applies_to(&self, namespace: &str, path: &Path) -> bool {
        self.matches_namespace(namespace) && self.contains_path(path)
    }

    /// Directory the namespace is expected to live in under this mapping.
    pub fn expected_directory(&self, namespace: &str) -> Option<PathBuf> {
        let qualified = format!("{}\\", namespace.trim_matches('\\'));
        let remainder = qualified.strip_prefix(&self.prefix)?;
        let mut directory = self.directory.clone();
        for segment in remainder.split('\\').filter(|s| !s.is_empty()) {
            directory.push(segment);
        }
        Some(directory)
    }
}

/// Parses the `psr-4` maps of a composer manifest, primary section first.
pub fn parse_manifest(content: &str, manifest: &Path) -> Result<Vec<NamespaceMapping>, ManifestError> {
    let document: Value = serde_json::from_str(content)
        .map_err(|e| ManifestError::invalid_manifest(manifest, e.to_string()))?;
    if !document.is_object() {
        return Err(ManifestError::invalid_manifest(manifest, "expected a JSON object"));
    }

    let base = manifest.parent().unwrap_or(Path::new(""));
    let mut mappings = Vec::new();

    for (section, dev) in SECTIONS {
        let Some(psr4) = document
            .get(section)
            .and_then(|s| s.get("psr-4"))
            .and_then(Value::as_object)
        else {
            continue;
        };

        for (prefix, directories) in psr4 {
            let directories: Vec<&str> = match directories {
                Value::String(dir) => vec![dir.as_str()],
                Value::Array(dirs) => dirs.iter().filter_map(Value::as_str).collect(),
                other => {
                    warn!(manifest = %manifest.display(), prefix, value = %other, "ignoring malformed psr-4 entry");
                    continue;
                }
            };

            for directory in directories {
                let mut mapping =
                    NamespaceMapping::new(prefix, base.join(normalize_entry(directory)), manifest);
                mapping.dev = *dev;
                trace!(prefix = %mapping.prefix, directory = %mapping.directory.display(), "psr-4 mapping");
                mappings.push(mapping);
            }
        }
    }

    Ok(mappings)
}

/// Mappings for one project root, grouped by the manifest that declared them.
#[derive(Debug, Clone, Default)]
pub struct NamespaceResolver {
    mappings: Vec<NamespaceMapping>,
}

impl NamespaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the mappings owned by `manifest`. Malformed content retracts
    /// them and logs instead of failing.
    pub fn load(&mut self, manifest: &Path, content: &str) -> usize {
        self.retract(manifest);
        match parse_manifest(content, manifest) {
            Ok(mappings) => {
                let count = mappings.len();
                debug!(manifest = %manifest.display(), count, "loaded namespace mappings");
                self.mappings.extend(mappings);
                count
            }
            Err(e) => {
                warn!(error = %e, "ignoring manifest");
                0
            }
        }
    }

    pub fn load_file(&mut self, manifest: &Path) -> usize {
        match fs::read_to_string(manifest) {
            Ok(content) => self.load(manifest, &content),
            Err(e) => {
                debug!(manifest = %manifest.display(), error = %e, "manifest not readable");
                self.retract(manifest);
                0
            }
        }
    }

    pub fn retract(&mut self, manifest: &Path) -> usize {
        let before = self.mappings.len();
        self.mappings.retain(|m| m.manifest != manifest);
        before - self.mappings.len()
    }

    /// First mapping, in declaration order, satisfying both the namespace and
    /// the location condition.
    pub fn resolve(&self, namespace: &str, path: &Path) -> Option<&NamespaceMapping> {
        self.mappings.iter().find(|m| m.applies_to(namespace, path))
    }

    pub fn mappings(&self) -> &[NamespaceMapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
