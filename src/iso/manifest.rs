//! `md5sum.txt` maintenance.
//!
//! Debian ISOs ship an md5 manifest that the installer's "check integrity"
//! step verifies, so every file we add or patch needs a fresh entry.

use anyhow::{bail, Result};
use std::path::Path;

use crate::process::Cmd;

/// Replace or append `<md5>  ./<path>` entries.
///
/// `updates` pairs an ISO path (`/isolinux/txt.cfg`) with its new digest.
/// Existing entries keep their position; new ones are appended in order.
pub fn update_md5_manifest(manifest: &str, updates: &[(String, String)]) -> String {
    let mut lines: Vec<String> = manifest.lines().map(str::to_string).collect();

    for (iso_path, digest) in updates {
        let entry_path = format!("./{}", iso_path.trim_start_matches('/'));
        let entry = format!("{}  {}", digest, entry_path);
        let existing = lines.iter().position(|l| {
            l.split_once(char::is_whitespace)
                .map(|(_, p)| p.trim() == entry_path)
                .unwrap_or(false)
        });
        match existing {
            Some(idx) => lines[idx] = entry,
            None => lines.push(entry),
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// md5 of a local file via `md5sum`.
pub fn md5_file(path: &Path) -> Result<String> {
    let result = Cmd::new("md5sum")
        .arg_path(path)
        .error_msg(format!("md5sum failed for {}", path.display()))
        .run()?;
    match result.stdout_trimmed().split_whitespace().next() {
        Some(digest) if digest.len() == 32 => Ok(digest.to_string()),
        _ => bail!("Unexpected md5sum output: {}", result.stdout_trimmed()),
    }
}
