//! File operations used by the host configuration steps.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories as needed.
///
/// The mode is applied after writing, so credentials files briefly carry the
/// umask default. Callers writing secrets into world-readable directories
/// should write into a private directory first.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {:o} {}", mode, path.display()))?;
    Ok(())
}

/// Copy `path` to `path.bak` unless a backup already exists.
///
/// Returns the backup path when one was created. Keeping the first backup
/// means re-running a configuration step never loses the distro original.
pub fn backup_once(path: &Path) -> Result<Option<PathBuf>> {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    let backup = PathBuf::from(name);

    if backup.exists() || !path.exists() {
        return Ok(None);
    }
    fs::copy(path, &backup)
        .with_context(|| format!("Failed to back up {}", path.display()))?;
    Ok(Some(backup))
}

/// Append `line` to a file unless an identical line is already present.
///
/// Returns true if the file changed.
pub fn append_line_if_missing(path: &Path, line: &str) -> Result<bool> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };
    if existing.lines().any(|l| l.trim() == line.trim()) {
        return Ok(false);
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(line.trim_end());
    content.push('\n');
    write_file_with_dirs(path, content)?;
    Ok(true)
}

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write a `sha256sum`-compatible sidecar next to `path`.
pub fn write_checksum_sidecar(path: &Path) -> Result<PathBuf> {
    let digest = sha256_file(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);
    fs::write(&sidecar, format!("{}  {}\n", digest, name))?;
    Ok(sidecar)
}

/// Check `path` against its `.sha256` sidecar.
///
/// Returns `Ok(false)` when there is no sidecar to check against.
pub fn verify_checksum_sidecar(path: &Path) -> Result<bool> {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);
    if !sidecar.exists() {
        return Ok(false);
    }
    let content = fs::read_to_string(&sidecar)?;
    let expected = content
        .split_whitespace()
        .next()
        .with_context(|| format!("Empty checksum file {}", sidecar.display()))?;
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        anyhow::bail!(
            "Checksum mismatch for {}:\n  expected {}\n  actual   {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_mode_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc/.smb_nas");
        write_file_mode(&path, "username=me\n", 0o600).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_backup_once_keeps_first_copy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sshd_config");
        fs::write(&path, "original").unwrap();

        let backup = backup_once(&path).unwrap().unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "original");

        fs::write(&path, "modified").unwrap();
        assert!(backup_once(&path).unwrap().is_none());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "original");
    }

    #[test]
    fn test_append_line_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, "ssh-ed25519 AAAA first").unwrap();

        assert!(append_line_if_missing(&path, "ssh-ed25519 BBBB second").unwrap());
        assert!(!append_line_if_missing(&path, "ssh-ed25519 BBBB second").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ssh-ed25519 AAAA first\nssh-ed25519 BBBB second\n"
        );
    }

    #[test]
    fn test_sha256_sidecar_roundtrip_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar.gz.enc");
        fs::write(&path, b"abc").unwrap();

        let sidecar = write_checksum_sidecar(&path).unwrap();
        let content = fs::read_to_string(sidecar).unwrap();
        assert!(content.starts_with(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  backup.tar.gz.enc"
        ));
        assert!(verify_checksum_sidecar(&path).unwrap());

        fs::write(&path, b"abd").unwrap();
        assert!(verify_checksum_sidecar(&path).is_err());
    }
}
