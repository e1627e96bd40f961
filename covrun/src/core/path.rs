//! Helpers for rendering deterministic unit labels.

use std::path::{Component, Path};

/// Return the `/`-separated path of `path` relative to `root`.
///
/// Falls back to the full path when `path` is not under `root`. The separator
/// is normalized so labels sort identically on every platform.
pub fn relative_label(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect();
    parts.join("/")
}
