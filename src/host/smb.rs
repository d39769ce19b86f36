//! SMB/CIFS shares from the `.smb` secrets file.
//!
//! ```text
//! SMB_HOST_1=nas.home.arpa
//! SMB_HOST_1_USER=me
//! SMB_HOST_1_PW=secret
//! SMB_HOST_1_SHARE_1=media
//! SMB_HOST_1_SHARE_2=backup
//! ```
//!
//! Each share gets a credentials file, a mount point under `/mnt`, an fstab
//! entry and an immediate mount attempt. A systemd unit remounts everything
//! at boot once the SMB hosts answer.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::common::{backup_once, write_file_mode};
use crate::config::{Config, HostRoot};
use crate::process::Cmd;
use crate::term;

pub const SMB_SECRETS_FILE: &str = ".smb";
pub const FSTAB: &str = "/etc/fstab";
pub const AUTOMOUNT_UNIT: &str = "/etc/systemd/system/automount-on-start.service";

/// Tried in order until one mounts.
pub const SMB_VERSIONS: &[&str] = &["3.0", "2.0", "1.0"];

const TEMPLATE: &str = "# SMB/CIFS shares mounted by 'homelab host smb'

# SMB Host 1
SMB_HOST_1=server1.home.arpa
SMB_HOST_1_USER=myuser
SMB_HOST_1_PW=mypassword
SMB_HOST_1_SHARE_1=share1
SMB_HOST_1_SHARE_2=share2

# SMB Host 2
SMB_HOST_2=server2.home.arpa
SMB_HOST_2_USER=otheruser
SMB_HOST_2_PW=otherpassword
SMB_HOST_2_SHARE_1=othershare
";

/// `$$` is systemd's escape for a literal `$`.
pub const AUTOMOUNT_UNIT_CONTENT: &str = r#"[Unit]
Description=Mount network shares once their hosts answer
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
RemainAfterExit=yes
ExecStartPre=/bin/sleep 15
ExecStart=/bin/bash -c 'for host in $$(grep -E "^//" /etc/fstab | grep -w cifs | cut -d/ -f3 | sort -u); do for i in $$(seq 1 10); do ping -c 1 -W 2 "$$host" >/dev/null && break; echo "Waiting for $$host..."; sleep 3; done; done; mount -a -t cifs'

[Install]
WantedBy=multi-user.target
"#;

/// One SMB server with its shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbHost {
    pub index: u32,
    pub host: String,
    pub user: String,
    pub password: String,
    pub shares: Vec<String>,
}

impl SmbHost {
    /// `/etc/.smb_<host with dots as underscores>`
    pub fn credentials_path(&self) -> PathBuf {
        PathBuf::from(format!("/etc/.smb_{}", self.host.replace('.', "_")))
    }

    pub fn credentials(&self) -> String {
        format!("username={}\npassword={}\n", self.user, self.password)
    }
}

/// Read hosts from `SMB_*` variables. Hosts come back in numeric order;
/// incomplete hosts are returned as warnings instead.
pub fn parse_hosts(vars: &BTreeMap<String, String>) -> (Vec<SmbHost>, Vec<String>) {
    let mut indices: Vec<u32> = vars
        .keys()
        .filter_map(|k| k.strip_prefix("SMB_HOST_"))
        .filter_map(|rest| rest.parse::<u32>().ok())
        .collect();
    indices.sort_unstable();
    indices.dedup();

    let mut hosts = Vec::new();
    let mut warnings = Vec::new();
    for index in indices {
        let get = |suffix: &str| {
            vars.get(&format!("SMB_HOST_{}{}", index, suffix))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let (Some(host), Some(user), Some(password)) = (get(""), get("_USER"), get("_PW")) else {
            warnings.push(format!(
                "SMB_HOST_{} is missing a host name, _USER or _PW; skipped",
                index
            ));
            continue;
        };

        let shares: Vec<String> = (1..)
            .map_while(|n| get(&format!("_SHARE_{}", n)))
            .collect();
        if shares.is_empty() {
            warnings.push(format!("SMB_HOST_{} ({}) has no shares", index, host));
        }
        hosts.push(SmbHost {
            index,
            host,
            user,
            password,
            shares,
        });
    }
    (hosts, warnings)
}

pub fn mount_point(share: &str) -> PathBuf {
    Path::new("/mnt").join(share)
}

pub fn fstab_entry(host: &SmbHost, share: &str, owner: &str) -> String {
    format!(
        "//{}/{} {} cifs credentials={},x-gvfs-show,uid={},gid={} 0 0",
        host.host,
        share,
        mount_point(share).display(),
        host.credentials_path().display(),
        owner,
        owner
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FstabChange {
    Added,
    Replaced,
    Unchanged,
}

/// Insert `entry` into fstab, replacing any line with the same device and
/// mount point.
pub fn upsert_fstab(content: &str, entry: &str) -> (String, FstabChange) {
    let key: Vec<&str> = entry.split_whitespace().take(2).collect();
    let mut change = None;
    let mut lines: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        let same_key = !trimmed.starts_with('#')
            && trimmed.split_whitespace().take(2).collect::<Vec<_>>() == key;
        if !same_key {
            lines.push(line.to_string());
            continue;
        }
        match change {
            // Duplicate of an entry already handled
            Some(_) => continue,
            None if line.trim() == entry => {
                change = Some(FstabChange::Unchanged);
                lines.push(line.to_string());
            }
            None => {
                change = Some(FstabChange::Replaced);
                lines.push(entry.to_string());
            }
        }
    }

    let change = change.unwrap_or_else(|| {
        lines.push(entry.to_string());
        FstabChange::Added
    });
    let mut out = lines.join("\n");
    out.push('\n');
    (out, change)
}

/// True if `/proc/mounts` content lists `mount_point`.
pub fn is_mounted(mounts: &str, mount_point: &Path) -> bool {
    let wanted = mount_point.to_string_lossy();
    mounts
        .lines()
        .any(|l| l.split_whitespace().nth(1) == Some(wanted.as_ref()))
}

/// Mount or report per share.
#[derive(Debug, Default)]
pub struct SmbSummary {
    pub mounted: Vec<String>,
    pub already_mounted: Vec<String>,
    pub failed: Vec<String>,
}

/// Set up every configured share.
pub fn configure(config: &Config) -> Result<SmbSummary> {
    let root = &config.host_root;
    term::banner("Configuring SMB shares");

    let secrets_file = config.secrets_dir.join(SMB_SECRETS_FILE);
    if !secrets_file.is_file() {
        write_file_mode(&secrets_file, TEMPLATE, 0o600)?;
        term::warn(format!(
            "No SMB configuration found. A template was written to {}.\n\
             Edit it and run 'homelab host smb' again.",
            secrets_file.display()
        ));
        return Ok(SmbSummary::default());
    }

    let (hosts, warnings) = parse_hosts(&config.secrets.with_prefix("SMB_HOST_"));
    for warning in &warnings {
        term::warn(warning);
    }
    if hosts.iter().all(|h| h.shares.is_empty()) {
        term::warn(format!("No shares configured in {}", secrets_file.display()));
        return Ok(SmbSummary::default());
    }

    let owner = super::admin_user(config)?;
    let mounts = if root.is_live() {
        fs::read_to_string("/proc/mounts").unwrap_or_default()
    } else {
        String::new()
    };

    let mut summary = SmbSummary::default();
    for host in &hosts {
        let credentials = root.path(host.credentials_path());
        write_file_mode(&credentials, host.credentials(), 0o600)?;
        term::ok(format!("Credentials for {} in {}", host.host, credentials.display()));

        for share in &host.shares {
            term::step(format!("Share //{}/{}", host.host, share));
            prepare_mount_point(root, &owner, share)?;
            update_fstab(root, &fstab_entry(host, share, &owner))?;

            let target = mount_point(share);
            if is_mounted(&mounts, &target) {
                term::skip(format!("{} already mounted", target.display()));
                summary.already_mounted.push(share.clone());
                continue;
            }
            if !root.is_live() {
                term::skip(format!("mount {} (host root {})", target.display(), root.root().display()));
                continue;
            }
            match mount_share(host, share, &owner) {
                Some(version) => {
                    term::ok(format!("Mounted {} with SMB {}", target.display(), version));
                    summary.mounted.push(share.clone());
                }
                None => {
                    term::error(format!(
                        "Failed to mount {}. Check the network and credentials; \
                         it will be retried at boot.",
                        share
                    ));
                    summary.failed.push(share.clone());
                }
            }
        }
    }

    install_automount_unit(root)?;
    Ok(summary)
}

fn prepare_mount_point(root: &HostRoot, owner: &str, share: &str) -> Result<()> {
    let path = root.path(mount_point(share));
    fs::create_dir_all(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    super::chown(root, owner, &path, false)
}

fn update_fstab(root: &HostRoot, entry: &str) -> Result<()> {
    let path = root.path(FSTAB);
    let current = if path.exists() {
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };
    let (updated, change) = upsert_fstab(&current, entry);
    match change {
        FstabChange::Unchanged => term::skip("fstab entry already present"),
        FstabChange::Added | FstabChange::Replaced => {
            backup_once(&path)?;
            write_file_mode(&path, updated, 0o644)?;
            if change == FstabChange::Added {
                term::ok("fstab entry added");
            } else {
                term::ok("fstab entry updated");
            }
        }
    }
    Ok(())
}

/// Try each protocol version; returns the one that worked.
fn mount_share(host: &SmbHost, share: &str, owner: &str) -> Option<&'static str> {
    let target = mount_point(share);
    for &version in SMB_VERSIONS {
        let result = Cmd::new("mount")
            .args(["-t", "cifs"])
            .arg(format!("//{}/{}", host.host, share))
            .arg_path(&target)
            .arg("-o")
            .arg(format!(
                "credentials={},vers={},uid={},gid={}",
                host.credentials_path().display(),
                version,
                owner,
                owner
            ))
            .allow_fail()
            .run();
        match result {
            Ok(r) if r.success() => return Some(version),
            Ok(r) => tracing::debug!(share, version, stderr = %r.stderr_trimmed(), "mount failed"),
            Err(e) => tracing::debug!(share, version, error = %e, "mount failed"),
        }
    }
    None
}

fn install_automount_unit(root: &HostRoot) -> Result<()> {
    let path = root.path(AUTOMOUNT_UNIT);
    write_file_mode(&path, AUTOMOUNT_UNIT_CONTENT, 0o644)?;
    term::ok(format!("Installed {}", path.display()));
    super::systemctl(root, &["daemon-reload"])?;
    super::systemctl(root, &["enable", "automount-on-start.service"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn nas() -> SmbHost {
        SmbHost {
            index: 1,
            host: "nas.home.arpa".into(),
            user: "me".into(),
            password: "pw".into(),
            shares: vec!["media".into()],
        }
    }

    #[test]
    fn test_parse_hosts_numeric_order_and_contiguous_shares() {
        let (hosts, warnings) = parse_hosts(&vars(&[
            ("SMB_HOST_10", "ten.lan"),
            ("SMB_HOST_10_USER", "u"),
            ("SMB_HOST_10_PW", "p"),
            ("SMB_HOST_10_SHARE_1", "a"),
            ("SMB_HOST_2", "two.lan"),
            ("SMB_HOST_2_USER", "u"),
            ("SMB_HOST_2_PW", "p"),
            ("SMB_HOST_2_SHARE_1", "x"),
            ("SMB_HOST_2_SHARE_2", "y"),
            ("SMB_HOST_2_SHARE_4", "gap"),
        ]));
        assert!(warnings.is_empty());
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "two.lan");
        assert_eq!(hosts[0].shares, vec!["x", "y"]);
        assert_eq!(hosts[1].index, 10);
    }

    #[test]
    fn test_incomplete_host_is_skipped() {
        let (hosts, warnings) = parse_hosts(&vars(&[
            ("SMB_HOST_1", "nas.lan"),
            ("SMB_HOST_1_USER", "me"),
            ("SMB_HOST_1_SHARE_1", "media"),
        ]));
        assert!(hosts.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("SMB_HOST_1"));
    }

    #[test]
    fn test_credentials_path() {
        assert_eq!(nas().credentials_path(), PathBuf::from("/etc/.smb_nas_home_arpa"));
    }

    #[test]
    fn test_fstab_entry() {
        assert_eq!(
            fstab_entry(&nas(), "media", "alice"),
            "//nas.home.arpa/media /mnt/media cifs credentials=/etc/.smb_nas_home_arpa,x-gvfs-show,uid=alice,gid=alice 0 0"
        );
    }

    #[test]
    fn test_upsert_fstab() {
        let base = "UUID=abc / ext4 defaults 0 1\n";
        let entry = fstab_entry(&nas(), "media", "alice");

        let (added, change) = upsert_fstab(base, &entry);
        assert_eq!(change, FstabChange::Added);
        assert_eq!(added, format!("{}{}\n", base, entry));

        let (same, change) = upsert_fstab(&added, &entry);
        assert_eq!(change, FstabChange::Unchanged);
        assert_eq!(same, added);

        let stale = format!("{}//nas.home.arpa/media /mnt/media cifs guest 0 0\n", base);
        let (replaced, change) = upsert_fstab(&stale, &entry);
        assert_eq!(change, FstabChange::Replaced);
        assert_eq!(replaced, added);
    }

    #[test]
    fn test_commented_entries_are_ignored() {
        let entry = fstab_entry(&nas(), "media", "alice");
        let content = "# //nas.home.arpa/media /mnt/media cifs old 0 0\n";
        let (out, change) = upsert_fstab(content, &entry);
        assert_eq!(change, FstabChange::Added);
        assert!(out.starts_with("# //nas.home.arpa/media"));
    }

    #[test]
    fn test_is_mounted() {
        let mounts = "proc /proc proc rw 0 0\n//nas/media /mnt/media cifs rw 0 0\n";
        assert!(is_mounted(mounts, Path::new("/mnt/media")));
        assert!(!is_mounted(mounts, Path::new("/mnt/med")));
    }

    #[test]
    fn test_automount_unit_escapes_dollars() {
        let exec = AUTOMOUNT_UNIT_CONTENT
            .lines()
            .find(|l| l.starts_with("ExecStart="))
            .unwrap();
        assert!(!exec.replace("$$", "").contains('$'));
    }
}
