use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::IoError;

pub fn walk_source_files(
    root: &Path,
    extension: &str,
    excluded_dirs: &[&str],
    exclude_hidden: bool,
) -> Result<Vec<PathBuf>, IoError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter().filter_entry(|e| {
        if e.depth() == 0 {
            return true;
        }
        let name = e.file_name().to_string_lossy();
        if e.file_type().is_dir() {
            if exclude_hidden && name.starts_with('.') {
                return false;
            }
            !excluded_dirs.contains(&name.as_ref())
        } else {
            true
        }
    }) {
        // Only a failure on the root itself is fatal; bad entries below it are skipped.
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(IoError::directory_scan_error(root, e)),
            Err(e) => {
                warn!(path = ?e.path(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if exclude_hidden && entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.path().extension().is_some_and(|ext| ext == extension)
            && !in_excluded_dir(entry.path().strip_prefix(root).unwrap_or(entry.path()), excluded_dirs)
        {
            files.push(entry.path().to_path_buf());
        }
    }

    Ok(files)
}

fn in_excluded_dir(relative: &Path, excluded_dirs: &[&str]) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => excluded_dirs.contains(&name.to_string_lossy().as_ref()),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_source_files_finds_files_with_extension() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("tests/Unit")).unwrap();
        fs::write(root.join("tests/FooTest.php"), "<?php").unwrap();
        fs::write(root.join("tests/Unit/BarTest.php"), "<?php").unwrap();
        fs::write(root.join("tests/fixture.json"), "{}").unwrap();

        let files = walk_source_files(root, "php", &[], false).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.file_name().unwrap() == "FooTest.php"));
    }

    #[test]
    fn test_walk_source_files_excludes_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("vendor/phpunit/phpunit")).unwrap();
        fs::write(root.join("FooTest.php"), "<?php").unwrap();
        fs::write(root.join("vendor/phpunit/phpunit/Assert.php"), "<?php").unwrap();

        let files = walk_source_files(root, "php", &["vendor"], false).unwrap();

        assert_eq!(files, vec![root.join("FooTest.php")]);
    }

    #[test]
    fn test_walk_source_files_excludes_hidden() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("FooTest.php"), "<?php").unwrap();
        fs::write(root.join(".cache/StaleTest.php"), "<?php").unwrap();

        assert_eq!(walk_source_files(root, "php", &[], false).unwrap().len(), 2);
        assert_eq!(walk_source_files(root, "php", &[], true).unwrap(), vec![root.join("FooTest.php")]);
    }

    #[test]
    fn test_excluded_name_above_root_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("vendor/acme/pkg");
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("tests/PkgTest.php"), "<?php").unwrap();

        assert_eq!(walk_source_files(&root, "php", &["vendor"], false).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_entries_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("tests/loop")).unwrap();
        fs::write(root.join("tests/FooTest.php"), "<?php").unwrap();
        std::os::unix::fs::symlink(root.join("missing"), root.join("tests/Dangling.php")).unwrap();
        std::os::unix::fs::symlink(root.join("tests"), root.join("tests/loop/back")).unwrap();

        let files = walk_source_files(root, "php", &[], false).unwrap();

        assert_eq!(files, vec![root.join("tests/FooTest.php")]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = walk_source_files(&temp_dir.path().join("missing"), "php", &[], false).unwrap_err();
        assert!(matches!(err, IoError::DirectoryScanError { .. }));
    }
}
