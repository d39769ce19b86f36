//! Configuration management for homelab.
//!
//! Directories come from `.env` files and environment variables (environment
//! wins). Secrets come from the dotfiles under the secrets directory
//! (`/etc/secrets/.cloudflare`, `/etc/secrets/.smb`, ...), again with the
//! process environment taking precedence.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the host's secrets files.
pub const DEFAULT_SECRETS_DIR: &str = "/etc/secrets";

/// Default location for encrypted backups.
pub const DEFAULT_BACKUP_DIR: &str = "/var/backups/homelab";

/// Homelab configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `KEY=value` dotfiles (default: /etc/secrets)
    pub secrets_dir: PathBuf,
    /// Compose project directory (default: <base>/docker-compose)
    pub stack_dir: PathBuf,
    /// Build outputs such as the remastered ISO (default: <base>/output)
    pub output_dir: PathBuf,
    /// Where backup archives are written (default: /var/backups/homelab)
    pub backup_dir: PathBuf,
    /// Root used for host configuration edits (default: /)
    pub host_root: HostRoot,
    pub secrets: Secrets,
}

impl Config {
    /// Load configuration from .env files, environment and secrets directory.
    ///
    /// `.env` is looked up in:
    /// 1. `base_dir`
    /// 2. the user config directory (`~/.config/homelab/.env`)
    pub fn load(base_dir: &Path) -> Result<Self> {
        let mut candidates = vec![base_dir.join(".env")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("homelab").join(".env"));
        }
        for path in candidates {
            if path.is_file() {
                // dotenvy never overrides variables that are already set
                dotenvy::from_path(&path)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                tracing::debug!(path = %path.display(), "loaded env file");
            }
        }

        let secrets_dir = dir_from_env("HOMELAB_SECRETS_DIR", base_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS_DIR));
        let stack_dir = dir_from_env("HOMELAB_STACK_DIR", base_dir)
            .unwrap_or_else(|| base_dir.join("docker-compose"));
        let output_dir = dir_from_env("HOMELAB_OUTPUT_DIR", base_dir)
            .unwrap_or_else(|| base_dir.join("output"));
        let backup_dir = dir_from_env("HOMELAB_BACKUP_DIR", base_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        let host_root = dir_from_env("HOMELAB_HOST_ROOT", base_dir)
            .map(HostRoot::new)
            .unwrap_or_default();

        let secrets = Secrets::load_dir(&secrets_dir)?;

        Ok(Self {
            secrets_dir,
            stack_dir,
            output_dir,
            backup_dir,
            host_root,
            secrets,
        })
    }

    /// Path of the stack's compose file.
    pub fn compose_file(&self) -> PathBuf {
        self.stack_dir.join("docker-compose.yml")
    }

    /// Print configuration for debugging. Secret values are never printed.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  HOMELAB_SECRETS_DIR: {}", self.secrets_dir.display());
        println!("  HOMELAB_STACK_DIR:   {}", self.stack_dir.display());
        println!("  HOMELAB_OUTPUT_DIR:  {}", self.output_dir.display());
        println!("  HOMELAB_BACKUP_DIR:  {}", self.backup_dir.display());
        println!("  HOMELAB_HOST_ROOT:   {}", self.host_root.root().display());
        if self.compose_file().exists() {
            println!("  Compose file: FOUND");
        } else {
            println!("  Compose file: NOT FOUND ({})", self.compose_file().display());
        }
        println!();
        self.secrets.print();
    }
}

/// Resolve a directory variable, making relative paths relative to `base_dir`.
fn dir_from_env(key: &str, base_dir: &Path) -> Option<PathBuf> {
    let value = env::var(key).ok().filter(|v| !v.trim().is_empty())?;
    let path = PathBuf::from(value.trim());
    Some(if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    })
}

/// Key/value secrets merged from the secrets directory.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: BTreeMap<String, String>,
    /// Which file each key was read from, for `show config`.
    sources: BTreeMap<String, String>,
}

impl Secrets {
    /// Load every dotfile directly under `dir`, in lexical order.
    ///
    /// A missing or unreadable directory yields empty secrets, as does an
    /// unreadable file for its own keys. Commands that need a key fail later
    /// through [`Secrets::require`] with a precise message; commands that
    /// need none keep working for unprivileged users.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut secrets = Self::default();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "secrets directory not found");
            return Ok(secrets);
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read secrets directory");
                return Ok(secrets);
            }
        };
        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && entry.path().is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        for file in files {
            if let Err(e) = secrets.load_file(&file) {
                tracing::warn!(path = %file.display(), error = %e, "skipping secrets file");
            }
        }
        Ok(secrets)
    }

    /// Merge one `KEY=value` file. Later files override earlier keys.
    ///
    /// Values are taken literally: no `$VAR` expansion, so passwords may
    /// contain `$`. One pair of surrounding quotes is stripped.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to open secrets file {}", path.display()))?;
        for (key, value) in parse_secrets(&text) {
            self.sources.insert(key.clone(), source.clone());
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Insert a value directly (tests and derived values).
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a key. The process environment overrides the files; empty
    /// values count as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        env::var(key)
            .ok()
            .or_else(|| self.values.get(key).cloned())
            .filter(|v| !v.is_empty())
    }

    /// Like [`Secrets::get`] but with a default.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Fetch all `keys`, failing with the complete list of missing ones.
    pub fn require(&self, keys: &[&str]) -> Result<Vec<String>> {
        let mut found = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match self.get(key) {
                Some(value) => found.push(value),
                None => missing.push(*key),
            }
        }
        if !missing.is_empty() {
            bail!(
                "Missing required secret(s): {}.\n\
                 Add them to a file under the secrets directory or export them.",
                missing.join(", ")
            );
        }
        Ok(found)
    }

    /// True if every key is present.
    pub fn has_all(&self, keys: &[&str]) -> bool {
        keys.iter().all(|k| self.get(k).is_some())
    }

    /// All keys from the secrets files with their effective values.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.values
            .keys()
            .filter_map(|k| self.get(k).map(|v| (k.clone(), v)))
            .collect()
    }

    /// Keys whose name starts with `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn print(&self) {
        if self.values.is_empty() {
            println!("Secrets: none loaded");
            return;
        }
        println!("Secrets ({} keys):", self.values.len());
        for key in self.values.keys() {
            let source = self.sources.get(key).map(String::as_str).unwrap_or("-");
            println!("  {:<32} ***  ({})", key, source);
        }
    }
}

/// Parse `KEY=value` lines. Blank lines, `#` comments and lines without `=`
/// are skipped; an optional `export ` prefix is accepted.
pub fn parse_secrets(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Maps absolute host paths under a root directory.
///
/// Production uses `/`; tests point it at a temp dir so fstab, sshd_config
/// and apt configuration edits never touch the real host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoot {
    root: PathBuf,
}

impl Default for HostRoot {
    fn default() -> Self {
        Self::new("/")
    }
}

impl HostRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when edits land on the live system.
    pub fn is_live(&self) -> bool {
        self.root == Path::new("/")
    }

    /// Resolve an absolute host path such as `/etc/fstab`.
    pub fn path(&self, host_path: impl AsRef<Path>) -> PathBuf {
        let host_path = host_path.as_ref();
        let relative = host_path.strip_prefix("/").unwrap_or(host_path);
        self.root.join(relative)
    }
}
