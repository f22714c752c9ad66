//! Mapping a job uri to its place under the download root.

use std::path::{Component, Path, PathBuf};

/// The uri cannot be stored under the download root.
#[derive(Debug, thiserror::Error)]
#[error("job uri {0:?} does not map to a path under the download root")]
pub struct UnsafeUri(pub String);

/// `root/uri`, keeping the uri's directory structure.
///
/// Rejects absolute uris, `..` segments, NUL or control characters, and uris
/// with no file name, so a job can never write outside `root`.
pub fn destination_path(root: &Path, uri: &str) -> Result<PathBuf, UnsafeUri> {
    let reject = || UnsafeUri(uri.to_string());
    if uri.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(reject());
    }

    let mut dest = root.to_path_buf();
    let mut named = false;
    for component in Path::new(uri).components() {
        match component {
            Component::Normal(seg) => {
                dest.push(seg);
                named = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject());
            }
        }
    }
    if !named || uri.ends_with('/') {
        return Err(reject());
    }
    Ok(dest)
}
