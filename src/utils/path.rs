use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: resolves `.` and `..` without touching the
/// file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical textual form of a source locator. Node ids embed this string, so
/// discovery and result correlation must both go through here.
pub fn canonical_locator(path: &Path) -> String {
    normalize_path(path).to_string_lossy().replace('\\', "/")
}

/// Whether `path` lies under (or equals) `dir`, compared lexically.
pub fn is_under(path: &Path, dir: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(dir))
}
