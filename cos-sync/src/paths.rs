use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote path {path:?} is outside scanned root {root:?}")]
    OutsideRoot { root: String, path: String },
    #[error("remote path contains unsupported component")]
    UnsupportedComponent,
}

/// Maps a scanned remote path to its local mirror by substituting the
/// remote root prefix with `local_root`.
pub fn local_target(
    local_root: &Path,
    remote_root: &str,
    remote_path: &str,
) -> Result<PathBuf, PathError> {
    let remainder = remote_path
        .strip_prefix(remote_root)
        .ok_or_else(|| PathError::OutsideRoot {
            root: remote_root.to_string(),
            path: remote_path.to_string(),
        })?;

    // Remote paths are POSIX-like; map the remainder segment by segment.
    let mut out = local_root.to_path_buf();
    for component in Path::new(remainder.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    Ok(out)
}
