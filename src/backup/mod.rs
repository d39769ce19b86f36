//! Encrypted host backups.
//!
//! An archive is a gzipped tarball of the configured host paths plus a
//! `homelab-meta/` directory holding state pulled out of running containers
//! (Traefik's `acme.json`). The tarball is listed with `tar -tzf` before it is
//! encrypted and again after decryption, so a corrupt archive never reaches
//! the host.

pub mod retention;

use anyhow::{bail, Context, Result};
use chrono::Local;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{cleanup_work_dir, prepare_work_dir, verify_checksum_sidecar, write_checksum_sidecar};
use crate::config::Config;
use crate::process::{retry, Cmd};
use crate::stack::Stack;
use crate::term;
use crate::timing::Timer;

pub use retention::{archive_prefix, select_expired};

/// Secret holding the encryption passphrase.
pub const PASSPHRASE_KEY: &str = "BACKUP_PASSPHRASE";

/// Archives kept per host unless `BACKUP_KEEP` says otherwise.
pub const DEFAULT_KEEP: usize = 7;

/// Where Traefik keeps its certificate store inside the container
/// (`ACME_CONTAINER_PATH` overrides).
pub const DEFAULT_ACME_CONTAINER_PATH: &str = "/letsencrypt/acme.json";

pub const ARCHIVE_SUFFIX: &str = ".tar.gz.enc";

const META_DIR: &str = "homelab-meta";
const ACME_ATTEMPTS: u32 = 5;
const ACME_DELAY: Duration = Duration::from_secs(2);
const TRAEFIK_CONTAINER: &str = "traefik";

/// Child-only variable openssl reads the passphrase from.
const PASSPHRASE_ENV: &str = "HOMELAB_BACKUP_PASSPHRASE";

/// Paths archived when `BACKUP_PATHS` is not set.
pub fn default_paths(config: &Config) -> Vec<PathBuf> {
    vec![
        config.secrets_dir.clone(),
        config.stack_dir.clone(),
        PathBuf::from("/etc/ssh"),
        PathBuf::from("/etc/fstab"),
        PathBuf::from("/etc/apt/apt.conf.d"),
    ]
}

/// Split `BACKUP_PATHS` on commas and whitespace.
pub fn parse_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Short hostname used in archive names.
pub fn hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            Cmd::new("hostname")
                .allow_fail()
                .run()
                .ok()
                .filter(|r| r.success())
                .map(|r| r.stdout_trimmed().to_string())
        })
        .map(|h| h.split('.').next().unwrap_or_default().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn archive_name(host: &str, stamp: &str) -> String {
    format!("{}{}{}", archive_prefix(host), stamp, ARCHIVE_SUFFIX)
}

/// Create an encrypted backup (backup-host.sh). Returns the archive path.
pub fn create(config: &Config, output_dir: Option<&Path>) -> Result<PathBuf> {
    let passphrase = config.secrets.require(&[PASSPHRASE_KEY])?.remove(0);
    let keep = match config.secrets.get("BACKUP_KEEP") {
        Some(v) => v
            .parse::<usize>()
            .with_context(|| format!("BACKUP_KEEP must be a number, got '{}'", v))?,
        None => DEFAULT_KEEP,
    };
    let output_dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| config.backup_dir.clone());

    term::banner("Creating host backup");
    let timer = Timer::start("Backup");

    // Stage 1: Collect paths
    let requested = match config.secrets.get("BACKUP_PATHS") {
        Some(value) => parse_paths(&value),
        None => default_paths(config),
    };
    let mut relative = Vec::new();
    for path in &requested {
        if !path.is_absolute() {
            term::warn(format!("Skipping relative backup path {}", path.display()));
            continue;
        }
        if !path.exists() {
            term::warn(format!("Skipping missing path {}", path.display()));
            continue;
        }
        relative.push(path.strip_prefix("/").unwrap_or(path).to_path_buf());
        term::detail(path.display().to_string());
    }
    if relative.is_empty() {
        bail!("Nothing to back up: none of the configured paths exist");
    }

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let work_dir = prepare_work_dir(&output_dir, ".homelab-backup-work")?;
    let acme_source = format!(
        "{}:{}",
        TRAEFIK_CONTAINER,
        config.secrets.get_or("ACME_CONTAINER_PATH", DEFAULT_ACME_CONTAINER_PATH)
    );
    let result = create_in(&work_dir, &output_dir, &relative, &acme_source, &passphrase);
    cleanup_work_dir(&work_dir);
    let archive = result?;

    // Stage 5: Retention
    let host = hostname();
    prune(&output_dir, &host, keep)?;

    timer.finish();
    println!("  Archive:  {}", archive.display());
    Ok(archive)
}

fn create_in(
    work_dir: &Path,
    output_dir: &Path,
    relative: &[PathBuf],
    acme_source: &str,
    passphrase: &str,
) -> Result<PathBuf> {
    // Stage 2: Container state
    let staging = work_dir.join("staging");
    let meta = staging.join(META_DIR);
    fs::create_dir_all(&meta)?;
    let acme_local = meta.join("acme.json");
    let copied = retry(ACME_ATTEMPTS, ACME_DELAY, "Copying acme.json from Traefik", |_| {
        Cmd::new("docker")
            .arg("cp")
            .arg(acme_source)
            .arg_path(&acme_local)
            .run()
            .map(|_| ())
    });
    match copied {
        Ok(()) => term::ok("Saved acme.json from the Traefik container"),
        Err(e) => term::warn(format!("{:#}. Certificates will be re-issued after restore.", e)),
    }

    // Stage 3: Tar and verify
    let tarball = work_dir.join("backup.tar.gz");
    let mut tar = Cmd::new("tar").arg("-czf").arg_path(&tarball).args(["-C", "/"]);
    for rel in relative {
        tar = tar.arg_path(rel);
    }
    tar.arg("-C")
        .arg_path(&staging)
        .arg(META_DIR)
        .error_msg("tar failed to create the backup")
        .run()?;
    let entries = list_tarball(&tarball)?;
    term::ok(format!("Tarball verified ({} entries)", entries.len()));

    // Stage 4: Encrypt and checksum
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let archive = output_dir.join(archive_name(&hostname(), &stamp));
    Cmd::new("openssl")
        .args(["enc", "-aes-256-cbc", "-salt", "-pbkdf2", "-in"])
        .arg_path(&tarball)
        .arg("-out")
        .arg_path(&archive)
        .arg("-pass")
        .arg(format!("env:{}", PASSPHRASE_ENV))
        .env(PASSPHRASE_ENV, passphrase)
        .error_msg("Encryption failed")
        .run()?;
    fs::set_permissions(&archive, fs::Permissions::from_mode(0o600))?;
    write_checksum_sidecar(&archive)?;
    term::ok(format!("Encrypted to {}", archive.display()));
    Ok(archive)
}

/// Delete this host's archives beyond the newest `keep`.
fn prune(dir: &Path, host: &str, keep: usize) -> Result<()> {
    let names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    for name in select_expired(&names, host, keep) {
        let path = dir.join(&name);
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        let mut sidecar = path.into_os_string();
        sidecar.push(".sha256");
        let _ = fs::remove_file(sidecar);
        term::detail(format!("Pruned {}", name));
    }
    Ok(())
}

/// Options for [`restore`].
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub archive: PathBuf,
    /// Extraction root; the host root when `None`.
    pub target: Option<PathBuf>,
    pub dry_run: bool,
}

/// Restore an encrypted backup (restore-host.sh).
pub fn restore(config: &Config, options: &RestoreOptions) -> Result<()> {
    let passphrase = config.secrets.require(&[PASSPHRASE_KEY])?.remove(0);
    let archive = &options.archive;
    if !archive.is_file() {
        bail!("Backup archive not found at {}", archive.display());
    }

    term::banner("Restoring host backup");

    // Stage 1: Checksum
    if verify_checksum_sidecar(archive)? {
        term::ok("Checksum matches");
    } else {
        term::warn("No .sha256 sidecar found, skipping checksum verification");
    }

    let parent = archive.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let work_dir = prepare_work_dir(parent, ".homelab-restore-work")?;
    let result = restore_in(config, options, &work_dir, &passphrase);
    cleanup_work_dir(&work_dir);
    result
}

fn restore_in(config: &Config, options: &RestoreOptions, work_dir: &Path, passphrase: &str) -> Result<()> {
    // Stage 2: Decrypt
    let tarball = work_dir.join("backup.tar.gz");
    Cmd::new("openssl")
        .args(["enc", "-d", "-aes-256-cbc", "-pbkdf2", "-in"])
        .arg_path(&options.archive)
        .arg("-out")
        .arg_path(&tarball)
        .arg("-pass")
        .arg(format!("env:{}", PASSPHRASE_ENV))
        .env(PASSPHRASE_ENV, passphrase)
        .error_msg("Decryption failed: wrong passphrase or corrupt archive")
        .run()?;

    // Stage 3: Verify
    let entries = list_tarball(&tarball)?;
    term::ok(format!("Archive decrypted and verified ({} entries)", entries.len()));

    if options.dry_run {
        println!("\nArchive contents:");
        for entry in &entries {
            println!("  {}", entry);
        }
        println!("\nDry run: nothing was restored.");
        return Ok(());
    }

    // Stage 4: Extract
    let target = options
        .target
        .clone()
        .unwrap_or_else(|| config.host_root.root().to_path_buf());
    fs::create_dir_all(&target)?;
    Cmd::new("tar")
        .arg("-xzf")
        .arg_path(&tarball)
        .arg("-C")
        .arg_path(&target)
        .error_msg("Extraction failed")
        .run()?;
    term::ok(format!("Extracted into {}", target.display()));

    // Stage 5: Certificates
    let saved_acme = target.join(META_DIR).join("acme.json");
    if saved_acme.is_file() {
        let dest = acme_destination(config, options.target.as_deref());
        retry(ACME_ATTEMPTS, ACME_DELAY, "Restoring acme.json", |_| {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&saved_acme, &dest)
                .with_context(|| format!("Failed to copy acme.json to {}", dest.display()))?;
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o600))?;
            Ok(())
        })?;
        term::ok(format!("Restored {}", dest.display()));
    } else {
        term::skip("Archive carries no acme.json");
    }
    let _ = fs::remove_dir_all(target.join(META_DIR));

    println!("\nRestore complete. Restart the stack with 'homelab stack start'.");
    Ok(())
}

/// The live stack's certificate store, or its mirror under an explicit
/// restore target.
fn acme_destination(config: &Config, target: Option<&Path>) -> PathBuf {
    let store = Stack::new(config).acme_store();
    match target {
        Some(target) => target.join(store.strip_prefix("/").unwrap_or(&store)),
        None => store,
    }
}

/// List a gzipped tarball; fails if it is corrupt.
fn list_tarball(tarball: &Path) -> Result<Vec<String>> {
    let result = Cmd::new("tar")
        .arg("-tzf")
        .arg_path(tarball)
        .error_msg("Archive verification failed (tar -tzf)")
        .run()?;
    let entries: Vec<String> = result
        .stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if entries.is_empty() {
        bail!("Archive {} is empty", tarball.display());
    }
    Ok(entries)
}
