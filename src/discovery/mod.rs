//! Finds the PHP files a project's tests live in.

mod utils;

pub use utils::walk_source_files;

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::IoError;
use crate::suites::SuiteRegistry;

pub const PHP_EXTENSION: &str = "php";

/// PHP files under `root` that can contribute tests.
///
/// With test suites configured only suite members qualify; without them
/// every PHP file outside the excluded directories is a candidate.
pub fn discover_test_files(
    root: &Path,
    excluded_dirs: &[&str],
    suites: &SuiteRegistry,
) -> Result<Vec<PathBuf>, IoError> {
    if !root.is_dir() {
        return Err(IoError::root_not_found(root));
    }

    let files = walk_source_files(root, PHP_EXTENSION, excluded_dirs, true)?;
    let total = files.len();
    let files: Vec<PathBuf> = if suites.is_empty() {
        files
    } else {
        files.into_iter().filter(|path| suites.includes(path)).collect()
    };

    debug!(root = %root.display(), scanned = total, candidates = files.len(), "discovered test files");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_suite_membership_limits_candidates() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("tests/Unit")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("tests/Unit/FooTest.php"), "<?php").unwrap();
        fs::write(root.join("tests/Unit/helpers.php"), "<?php").unwrap();
        fs::write(root.join("src/Foo.php"), "<?php").unwrap();
        let configuration = root.join("phpunit.xml");
        fs::write(
            &configuration,
            r#"<phpunit><testsuites><testsuite name="Unit"><directory>tests/Unit</directory></testsuite></testsuites></phpunit>"#,
        )
        .unwrap();

        let mut suites = SuiteRegistry::new();
        suites.load_file(&configuration);

        let files = discover_test_files(root, &["vendor"], &suites).unwrap();
        assert_eq!(files, vec![root.join("tests/Unit/FooTest.php")]);

        let all = discover_test_files(root, &["vendor"], &SuiteRegistry::new()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            discover_test_files(&missing, &[], &SuiteRegistry::new()),
            Err(IoError::RootNotFound { .. })
        ));
    }
}
