//! Unattended Debian ISO builder.
//!
//! Takes a stock Debian installer ISO and produces one that installs without
//! interaction:
//! - the preseed file is added at `/preseed.cfg`
//! - isolinux and GRUB install entries load it (`preseed/file=/cdrom/preseed.cfg`)
//! - menu timeouts are shortened
//! - `md5sum.txt` is refreshed for every changed file
//!
//! The ISO itself is never unpacked. `xorriso` extracts only the bootloader
//! configs and later replays the original boot records while mapping the
//! patched files over the originals.

pub mod bootloader;
pub mod manifest;
pub mod preseed;

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::common::{cleanup_work_dir, prepare_work_dir, write_checksum_sidecar, write_file_mode};
use crate::process::Cmd;
use crate::term;
use crate::timing::Timer;

use bootloader::{BootFile, BOOT_FILES};
use preseed::PRESEED_ISO_PATH;

/// Default output file name, relative to the output directory.
pub const DEFAULT_ISO_NAME: &str = "debian-unattended.iso";

/// Default menu timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 1;

const MD5_MANIFEST: &str = "/md5sum.txt";
const WORK_DIR_NAME: &str = "iso-work";

/// Where the preseed comes from.
#[derive(Debug, Clone)]
pub enum PreseedSource {
    /// A finished preseed file, used as is.
    File(PathBuf),
    /// Already rendered content (from a template).
    Rendered(String),
}

/// Everything needed for one ISO build.
#[derive(Debug, Clone)]
pub struct IsoBuildRequest {
    pub source_iso: PathBuf,
    pub preseed: PreseedSource,
    pub output_iso: PathBuf,
    pub timeout_secs: u32,
    /// New volume ID; the original is kept when `None`.
    pub volume_label: Option<String>,
}

/// A bootloader config pulled out of the source ISO and patched locally.
struct PatchedFile {
    iso_path: &'static str,
    local: PathBuf,
}

/// Build the unattended ISO. Returns the output path.
pub fn build_iso(request: &IsoBuildRequest, work_parent: &Path) -> Result<PathBuf> {
    term::banner("Building unattended Debian ISO");

    // Stage 1: Validate inputs
    validate_inputs(request)?;
    let work_dir = prepare_work_dir(work_parent, WORK_DIR_NAME)?;

    let result = build_in(request, &work_dir);
    cleanup_work_dir(&work_dir);
    result
}

fn build_in(request: &IsoBuildRequest, work_dir: &Path) -> Result<PathBuf> {
    // Stage 2: Preseed
    let preseed_path = work_dir.join("preseed.cfg");
    let preseed_text = match &request.preseed {
        PreseedSource::File(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read preseed {}", path.display()))?,
        PreseedSource::Rendered(text) => text.clone(),
    };
    let problems = preseed::validate(&preseed_text);
    if !problems.is_empty() {
        bail!(
            "Preseed is invalid:\n{}",
            problems
                .iter()
                .map(|p| format!("  - {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }
    // The preseed carries the password hash
    write_file_mode(&preseed_path, &preseed_text, 0o600)?;
    term::ok(format!("Preseed validated ({} bytes)", preseed_text.len()));

    // Stage 3: Extract and patch bootloader configs
    let timer = Timer::start("Patch bootloader");
    let extract_dir = work_dir.join("extract");
    let mut patched = Vec::new();
    for &(iso_path, kind) in BOOT_FILES {
        let Some(local) = extract_file(&request.source_iso, iso_path, &extract_dir)? else {
            term::skip(format!("{} not present on source ISO", iso_path));
            continue;
        };
        let original = fs::read_to_string(&local)
            .with_context(|| format!("Failed to read extracted {}", iso_path))?;
        let result = bootloader::patch(kind, &original, request.timeout_secs);
        fs::write(&local, &result.content)?;
        match kind {
            BootFile::IsolinuxMain => term::ok(format!("{}: timeout set", iso_path)),
            _ => term::ok(format!(
                "{}: {} install entr{} patched",
                iso_path,
                result.entries,
                if result.entries == 1 { "y" } else { "ies" }
            )),
        }
        patched.push(PatchedFile { iso_path, local });
    }
    if patched.is_empty() {
        bail!(
            "No bootloader configuration found on {}.\n\
             Is this a Debian installer ISO?",
            request.source_iso.display()
        );
    }
    timer.finish();

    // Stage 4: md5sum.txt
    let md5_local = extract_file(&request.source_iso, MD5_MANIFEST, &extract_dir)?;
    if let Some(ref md5_local) = md5_local {
        let mut updates = vec![(
            PRESEED_ISO_PATH.to_string(),
            manifest::md5_file(&preseed_path)?,
        )];
        for file in &patched {
            updates.push((file.iso_path.to_string(), manifest::md5_file(&file.local)?));
        }
        let current = fs::read_to_string(md5_local)?;
        fs::write(md5_local, manifest::update_md5_manifest(&current, &updates))?;
        term::ok(format!("md5sum.txt refreshed ({} entries)", updates.len()));
    }

    // Stage 5: Repack (to temp file for atomicity)
    let timer = Timer::start("Repack ISO");
    let temp_iso = temp_path(&request.output_iso);
    if temp_iso.exists() {
        fs::remove_file(&temp_iso)?;
    }
    if let Some(parent) = request.output_iso.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut cmd = Cmd::new("xorriso")
        .arg("-indev")
        .arg_path(&request.source_iso)
        .arg("-outdev")
        .arg_path(&temp_iso)
        .arg("-map")
        .arg_path(&preseed_path)
        .arg(PRESEED_ISO_PATH);
    for file in &patched {
        cmd = cmd.arg("-map").arg_path(&file.local).arg(file.iso_path);
    }
    if let Some(ref md5_local) = md5_local {
        cmd = cmd.arg("-map").arg_path(md5_local).arg(MD5_MANIFEST);
    }
    if let Some(ref label) = request.volume_label {
        cmd = cmd.args(["-volid", label.as_str()]);
    }
    cmd.args(["-boot_image", "any", "replay"])
        .error_msg("xorriso failed to repack the ISO")
        .run()?;
    timer.finish();

    // Stage 6: Atomic rename, checksum, verify
    fs::rename(&temp_iso, &request.output_iso)?;
    let sidecar = write_checksum_sidecar(&request.output_iso)?;
    verify_iso(&request.output_iso)?;

    print_iso_summary(&request.output_iso, &sidecar);
    Ok(request.output_iso.clone())
}

/// Stage 1: Validate that the inputs exist and do not collide.
fn validate_inputs(request: &IsoBuildRequest) -> Result<()> {
    if !request.source_iso.is_file() {
        bail!(
            "Source ISO not found at {}.\n\
             Download a Debian netinst ISO first.",
            request.source_iso.display()
        );
    }
    if let PreseedSource::File(ref path) = request.preseed {
        if !path.is_file() {
            bail!(
                "Preseed not found at {}.\n\
                 Run 'homelab iso init-preseed' to start from the bundled template.",
                path.display()
            );
        }
    }
    let same = match (
        request.source_iso.canonicalize(),
        request.output_iso.canonicalize(),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        bail!("Output ISO must differ from the source ISO");
    }
    Ok(())
}

/// Extract one file from the ISO into `dest_root`, keeping its ISO path.
///
/// Returns `None` when the ISO has no such file. Extracted files inherit the
/// ISO's read-only mode, so they are made writable for patching.
fn extract_file(iso: &Path, iso_path: &str, dest_root: &Path) -> Result<Option<PathBuf>> {
    let local = dest_root.join(iso_path.trim_start_matches('/'));
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }

    let result = Cmd::new("xorriso")
        .args(["-osirrox", "on", "-indev"])
        .arg_path(iso)
        .args(["-extract", iso_path])
        .arg_path(&local)
        .allow_fail()
        .run()?;

    if !result.success() || !local.is_file() {
        tracing::debug!(iso_path, stderr = %result.stderr_trimmed(), "not extracted");
        return Ok(None);
    }
    fs::set_permissions(&local, fs::Permissions::from_mode(0o644))?;
    Ok(Some(local))
}

fn temp_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Confirm the preseed made it into the output image.
pub fn verify_iso(path: &Path) -> Result<()> {
    print!("  Verifying ISO... ");

    let result = Cmd::new("xorriso")
        .arg("-indev")
        .arg_path(path)
        .args(["-find", PRESEED_ISO_PATH])
        .allow_fail()
        .run()?;

    if !result.success() || !result.stdout.contains("preseed.cfg") {
        println!("FAILED");
        bail!(
            "ISO verification failed: {} is missing from {}",
            PRESEED_ISO_PATH,
            path.display()
        );
    }

    println!("OK");
    Ok(())
}

fn print_iso_summary(iso: &Path, sidecar: &Path) {
    println!();
    term::banner("Unattended ISO created");
    println!("  Output:   {}", iso.display());
    match fs::metadata(iso) {
        Ok(meta) => println!("  Size:     {} MB", meta.len() / 1024 / 1024),
        Err(e) => term::warn(format!("Could not read ISO size: {}", e)),
    }
    println!("  Checksum: {}", sidecar.display());
    println!("\nWrite it to a USB stick with:");
    println!("  sudo dd if={} of=/dev/sdX bs=4M status=progress oflag=sync", iso.display());
}
