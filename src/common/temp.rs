//! Scratch directories for multi-step pipelines.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Prepare a work directory, removing leftovers from a previous run.
///
/// The directory is private (0700): it holds plaintext tarballs, the
/// staged certificate store and rendered preseeds.
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> Result<PathBuf> {
    let work_dir = parent_dir.join(name);

    if work_dir.exists() {
        fs::remove_dir_all(&work_dir)
            .with_context(|| format!("Failed to clear {}", work_dir.display()))?;
    }
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;
    fs::set_permissions(&work_dir, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to restrict {}", work_dir.display()))?;

    Ok(work_dir)
}

/// Remove a work directory. Missing directories are fine.
pub fn cleanup_work_dir(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove work dir");
        }
    }
}
