//! Homelab Compose stack: Traefik, Authelia, Glances, Jellyfin, WireGuard
//! and the DNS sync helper.
//!
//! The stack reads its configuration from a generated `.env` next to the
//! compose file, rebuilt from the secrets directory on every `up`, so the
//! secrets directory stays the single source of truth.

pub mod compose;

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::common::write_file_mode;
use crate::config::Config;
use crate::term;

pub use compose::ComposeBinary;

/// Traefik's certificate store, relative to the stack directory.
pub const ACME_STORE: &str = "traefik/acme.json";

/// Handle on the compose project.
pub struct Stack {
    dir: PathBuf,
    compose_file: PathBuf,
    env_file: PathBuf,
}

impl Stack {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.stack_dir.clone(),
            compose_file: config.compose_file(),
            env_file: config.stack_dir.join(".env"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn acme_store(&self) -> PathBuf {
        self.dir.join(ACME_STORE)
    }

    fn ensure_compose_file(&self) -> Result<()> {
        if !self.compose_file.is_file() {
            bail!(
                "Compose file not found at {}.\n\
                 Set HOMELAB_STACK_DIR to the directory holding docker-compose.yml.",
                self.compose_file.display()
            );
        }
        Ok(())
    }

    /// Regenerate `.env` from the secrets (mode 0600).
    pub fn write_env_file(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        write_file_mode(&self.env_file, render_env_file(entries), 0o600)?;
        term::ok(format!(
            "Wrote {} ({} variables)",
            self.env_file.display(),
            entries.len()
        ));
        Ok(())
    }

    /// Traefik refuses an acme.json that is readable by others.
    pub fn ensure_acme_store(&self) -> Result<()> {
        let path = self.acme_store();
        if !path.exists() {
            write_file_mode(&path, "", 0o600)?;
            term::ok(format!("Created empty {}", path.display()));
            return Ok(());
        }
        let mode = fs::metadata(&path)?.permissions().mode() & 0o777;
        if mode != 0o600 {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to chmod 600 {}", path.display()))?;
            term::ok(format!("Fixed {} permissions ({:o} -> 600)", path.display(), mode));
        }
        Ok(())
    }

    fn compose(&self, binary: ComposeBinary) -> crate::process::Cmd {
        binary.command(&self.dir, &self.compose_file, &self.env_file)
    }

    /// Bring the stack up in the background (up.sh).
    pub fn up(&self, config: &Config) -> Result<()> {
        self.ensure_compose_file()?;
        let binary = ComposeBinary::detect()?;

        term::step("Preparing stack environment...");
        self.write_env_file(&config.secrets.entries())?;
        self.ensure_acme_store()?;

        term::step(format!("Starting stack with {}...", binary.name()));
        self.compose(binary)
            .args(["up", "-d", "--remove-orphans"])
            .error_msg("Failed to start the stack")
            .run_interactive()?;
        term::ok("Stack is up");
        Ok(())
    }

    /// Stop the stack (stop.sh). `keep` stops containers without removing them.
    pub fn stop(&self, keep: bool) -> Result<()> {
        self.ensure_compose_file()?;
        let binary = ComposeBinary::detect()?;
        let action = if keep { "stop" } else { "down" };

        term::step(format!("Stopping stack ({})...", action));
        self.compose(binary)
            .arg(action)
            .error_msg("Failed to stop the stack")
            .run_interactive()?;
        term::ok("Stack stopped");
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        self.ensure_compose_file()?;
        let binary = ComposeBinary::detect()?;
        self.compose(binary).arg("ps").run_interactive()?;
        Ok(())
    }

    pub fn pull(&self) -> Result<()> {
        self.ensure_compose_file()?;
        let binary = ComposeBinary::detect()?;
        term::step("Pulling images...");
        self.compose(binary)
            .arg("pull")
            .error_msg("Failed to pull images")
            .run_interactive()?;
        Ok(())
    }
}

/// Render `KEY=value` lines for compose.
///
/// Values containing whitespace, `#`, quotes or `$` are single-quoted so
/// compose takes them literally (no interpolation). Single quotes cannot be
/// escaped inside single quotes, so such values are double-quoted with
/// `\`, `"` and `$` escaped instead.
pub fn render_env_file(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::from("# Generated by homelab from the secrets directory. Do not edit.\n");
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        if value.contains('\'') {
            out.push('"');
            for c in value.chars() {
                if matches!(c, '\\' | '"' | '$') {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else if needs_quoting(value) {
            out.push('\'');
            out.push_str(value);
            out.push('\'');
        } else {
            out.push_str(value);
        }
        out.push('\n');
    }
    out
}

fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$' | '\\'))
}
