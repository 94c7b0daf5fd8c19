//! Test suites declared in a PHPUnit XML configuration.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::error::ManifestError;
use crate::utils::normalize_entry;

pub const CONFIGURATION_FILES: &[&str] = &["phpunit.xml", "phpunit.xml.dist", "phpunit.dist.xml"];

pub const DEFAULT_SUFFIX: &str = "Test.php";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub suffix: Option<String>,
}

impl DirectoryEntry {
    pub fn suffix(&self) -> &str {
        self.suffix.as_deref().unwrap_or(DEFAULT_SUFFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteDefinition {
    pub name: String,
    pub configuration: PathBuf,
    pub directories: Vec<DirectoryEntry>,
    pub files: Vec<String>,
    pub excludes: Vec<String>,
}

impl SuiteDefinition {
    pub fn new(name: impl Into<String>, configuration: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            configuration: configuration.into(),
            directories: Vec::new(),
            files: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Directory all entries are relative to.
    pub fn base_dir(&self) -> &Path {
        self.configuration.parent().unwrap_or(Path::new(""))
    }

    pub fn include_patterns(&self) -> Vec<String> {
        let directories = self.directories.iter().map(|entry| {
            format!(
                "{}**/*{}",
                anchored(self.base_dir(), &entry.path),
                globset::escape(entry.suffix())
            )
        });
        let files = self
            .files
            .iter()
            .map(|file| anchored(self.base_dir(), file).trim_end_matches('/').to_string());
        directories.chain(files).collect()
    }

    pub fn exclude_patterns(&self) -> Vec<String> {
        self.excludes
            .iter()
            .flat_map(|entry| {
                let exact = anchored(self.base_dir(), entry).trim_end_matches('/').to_string();
                let nested = format!("{exact}/**");
                [exact, nested]
            })
            .collect()
    }

    pub fn matcher(&self) -> Result<SuiteMatcher, ManifestError> {
        Ok(SuiteMatcher {
            include: build_glob_set(&self.include_patterns())?,
            exclude: build_glob_set(&self.exclude_patterns())?,
        })
    }
}

/// `<base>/<entry>/`, with the base escaped and the entry kept as a pattern
/// since PHPUnit accepts wildcards in directory entries.
fn anchored(base: &Path, entry: &str) -> String {
    let base = globset::escape(&base.to_string_lossy().replace('\\', "/"));
    let base = base.trim_end_matches('/');
    if entry.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{entry}/")
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, ManifestError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
    }
    builder
        .build()
        .map_err(|e| ManifestError::invalid_glob(patterns.join(", "), e.to_string()))
}

fn compile_glob(pattern: &str) -> Result<Glob, ManifestError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ManifestError::invalid_glob(pattern, e.to_string()))
}

#[derive(Debug, Clone)]
pub struct SuiteMatcher {
    include: GlobSet,
    exclude: GlobSet,
}

impl SuiteMatcher {
    pub fn is_match(&self, path: &Path) -> bool {
        let path = path.to_string_lossy().replace('\\', "/");
        self.include.is_match(&path) && !self.exclude.is_match(&path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
    Exclude,
}

/// Parses every `<testsuite>` element; failures are logged and yield no suites.
pub fn parse_configuration(content: &str, configuration: &Path) -> Vec<SuiteDefinition> {
    match try_parse_configuration(content, configuration) {
        Ok(suites) => suites,
        Err(e) => {
            warn!(error = %e, "ignoring phpunit configuration");
            Vec::new()
        }
    }
}

pub fn try_parse_configuration(
    content: &str,
    configuration: &Path,
) -> Result<Vec<SuiteDefinition>, ManifestError> {
    let invalid = |message: String| ManifestError::invalid_configuration(configuration, message);

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut suites = Vec::new();
    let mut current: Option<SuiteDefinition> = None;
    let mut entry: Option<(EntryKind, Option<String>)> = None;
    let mut text = String::new();
    let mut saw_root = false;

    loop {
        match reader.read_event().map_err(|e| invalid(e.to_string()))? {
            Event::Start(element) => {
                saw_root = true;
                match element.local_name().as_ref() {
                    b"testsuite" => {
                        let name = attribute(&element, "name").map_err(invalid)?;
                        current = Some(SuiteDefinition::new(name.unwrap_or_default(), configuration));
                    }
                    b"directory" | b"file" | b"exclude" if current.is_some() => {
                        let kind = match element.local_name().as_ref() {
                            b"directory" => EntryKind::Directory,
                            b"file" => EntryKind::File,
                            _ => EntryKind::Exclude,
                        };
                        let suffix = attribute(&element, "suffix").map_err(invalid)?;
                        entry = Some((kind, suffix));
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(element) => {
                saw_root = true;
                if element.local_name().as_ref() == b"testsuite" {
                    let name = attribute(&element, "name").map_err(invalid)?;
                    suites.push(SuiteDefinition::new(name.unwrap_or_default(), configuration));
                }
            }
            Event::Text(content) if entry.is_some() => {
                text.push_str(&content.unescape().map_err(|e| invalid(e.to_string()))?);
            }
            Event::CData(content) if entry.is_some() => {
                text.push_str(&String::from_utf8_lossy(&content.into_inner()));
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"testsuite" => {
                    if let Some(suite) = current.take() {
                        trace!(suite = %suite.name, "parsed test suite");
                        suites.push(suite);
                    }
                }
                b"directory" | b"file" | b"exclude" => {
                    if let (Some((kind, suffix)), Some(suite)) = (entry.take(), current.as_mut()) {
                        let path = normalize_entry(&text);
                        match kind {
                            EntryKind::Directory => suite.directories.push(DirectoryEntry {
                                path,
                                suffix: suffix.filter(|s| !s.is_empty()),
                            }),
                            EntryKind::File if !path.is_empty() => suite.files.push(path),
                            EntryKind::Exclude if !path.is_empty() => suite.excludes.push(path),
                            _ => {}
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(invalid("document has no root element".to_string()));
    }
    if current.is_some() {
        return Err(invalid("unterminated <testsuite> element".to_string()));
    }
    Ok(suites)
}

fn attribute(element: &BytesStart, name: &str) -> Result<Option<String>, String> {
    let attribute = element
        .try_get_attribute(name)
        .map_err(|e| e.to_string())?;
    attribute
        .map(|a| {
            a.unescape_value()
                .map(|v| v.into_owned())
                .map_err(|e| e.to_string())
        })
        .transpose()
}

/// Locates the PHPUnit configuration for a project root.
pub fn find_configuration(root: &Path) -> Option<PathBuf> {
    CONFIGURATION_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Suites of one configuration document together with compiled matchers.
#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    configuration: Option<PathBuf>,
    suites: Vec<(SuiteDefinition, SuiteMatcher)>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, configuration: &Path, content: &str) -> usize {
        self.configuration = Some(configuration.to_path_buf());
        self.suites.clear();

        for suite in parse_configuration(content, configuration) {
            match suite.matcher() {
                Ok(matcher) => self.suites.push((suite, matcher)),
                Err(e) => warn!(suite = %suite.name, error = %e, "skipping suite"),
            }
        }
        debug!(
            configuration = %configuration.display(),
            count = self.suites.len(),
            "loaded test suites"
        );
        self.suites.len()
    }

    /// Missing or unreadable configuration yields no suites.
    pub fn load_file(&mut self, configuration: &Path) -> usize {
        match fs::read_to_string(configuration) {
            Ok(content) => self.load(configuration, &content),
            Err(e) => {
                debug!(configuration = %configuration.display(), error = %e, "configuration not readable");
                self.clear();
                0
            }
        }
    }

    pub fn clear(&mut self) {
        self.configuration = None;
        self.suites.clear();
    }

    pub fn configuration(&self) -> Option<&Path> {
        self.configuration.as_deref()
    }

    pub fn suites(&self) -> impl Iterator<Item = &SuiteDefinition> {
        self.suites.iter().map(|(suite, _)| suite)
    }

    pub fn get(&self, name: &str) -> Option<&SuiteDefinition> {
        self.suites().find(|suite| suite.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// First declared suite whose patterns include `path`.
    pub fn suite_for(&self, path: &Path) -> Option<&SuiteDefinition> {
        self.suites
            .iter()
            .find(|(_, matcher)| matcher.is_match(path))
            .map(|(suite, _)| suite)
    }

    /// Whether `path` falls within discovery scope. Without suites every file does.
    pub fn includes(&self, path: &Path) -> bool {
        self.is_empty() || self.suite_for(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<phpunit bootstrap="vendor/autoload.php" colors="true">
    <testsuites>
        <testsuite name="Unit">
            <directory suffix="Test.php">./tests/Unit/</directory>
            <exclude>./tests/Unit/Fixtures</exclude>
        </testsuite>
        <testsuite name="Feature">
            <directory>tests/Feature</directory>
            <file>./tests/SmokeCheck.php</file>
        </testsuite>
        <testsuite name="Empty"/>
    </testsuites>
</phpunit>
"#;

    fn config_path() -> &'static Path {
        Path::new("/app/phpunit.xml")
    }

    #[test]
    fn test_parse_configuration() {
        let suites = parse_configuration(CONFIG, config_path());

        let names: Vec<&str> = suites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Unit", "Feature", "Empty"]);
        assert_eq!(
            suites[0].directories,
            vec![DirectoryEntry {
                path: "tests/Unit".to_string(),
                suffix: Some("Test.php".to_string()),
            }]
        );
        assert_eq!(suites[0].excludes, vec!["tests/Unit/Fixtures"]);
        assert_eq!(suites[1].files, vec!["tests/SmokeCheck.php"]);
        assert_eq!(suites[1].directories[0].suffix(), DEFAULT_SUFFIX);
    }

    #[test]
    fn test_include_patterns_are_anchored() {
        let suites = parse_configuration(CONFIG, config_path());
        assert_eq!(
            suites[1].include_patterns(),
            vec![
                "/app/tests/Feature/**/*Test.php".to_string(),
                "/app/tests/SmokeCheck.php".to_string(),
            ]
        );
    }

    #[test]
    fn test_malformed_configuration_yields_no_suites() {
        assert!(parse_configuration("<phpunit><testsuites><testsuite name='x'>", config_path()).is_empty());
        assert!(parse_configuration("", config_path()).is_empty());
        assert!(parse_configuration("<phpunit></phpunit>", config_path()).is_empty());
    }

    #[test]
    fn test_registry_membership() {
        let mut registry = SuiteRegistry::new();
        assert_eq!(registry.load(config_path(), CONFIG), 3);

        let suite_name = |path: &str| registry.suite_for(Path::new(path)).map(|s| s.name.clone());

        assert_eq!(suite_name("/app/tests/Unit/FooTest.php"), Some("Unit".to_string()));
        assert_eq!(suite_name("/app/tests/Unit/Deep/BarTest.php"), Some("Unit".to_string()));
        assert_eq!(suite_name("/app/tests/Unit/Fixtures/StubTest.php"), None);
        assert_eq!(suite_name("/app/tests/Unit/Helper.php"), None);
        assert_eq!(suite_name("/app/tests/Feature/LoginTest.php"), Some("Feature".to_string()));
        assert_eq!(suite_name("/app/tests/SmokeCheck.php"), Some("Feature".to_string()));
        assert_eq!(suite_name("/app/src/FooTest.php"), None);
        assert!(!registry.includes(Path::new("/app/src/FooTest.php")));
    }

    #[test]
    fn test_empty_registry_includes_everything() {
        let registry = SuiteRegistry::new();
        assert!(registry.includes(Path::new("/anywhere/FooTest.php")));
        assert!(registry.suite_for(Path::new("/anywhere/FooTest.php")).is_none());
    }
}
