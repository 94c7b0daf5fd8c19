#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub fn get_test_fixture_path(language: &str, fixture_name: Option<&str>) -> PathBuf {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(language);
    match fixture_name {
        Some(fixture_name) => base.join(fixture_name),
        None => base,
    }
}

/// Copies a fixture project into `dest` so tests can edit it freely.
pub fn copy_fixture_project(name: &str, dest: &Path) -> PathBuf {
    let source = get_test_fixture_path("php", Some(name));
    let target = dest.join(name);
    copy_dir(&source, &target);
    target
}

/// The captured TeamCity log for `name`, with `{root}` replaced.
pub fn teamcity_log(name: &str, root: &Path) -> String {
    let path = get_test_fixture_path("php", Some(&format!("{name}.teamcity.log")));
    fs::read_to_string(path)
        .unwrap()
        .replace("{root}", &root.to_string_lossy())
}

pub fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn copy_dir(source: &Path, target: &Path) {
    fs::create_dir_all(target).unwrap();
    for entry in fs::read_dir(source).unwrap() {
        let entry = entry.unwrap();
        let dest = target.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &dest);
        } else {
            fs::copy(entry.path(), dest).unwrap();
        }
    }
}
