//! Admin account bootstrap: sudo rights, `sudo`/`docker` group membership
//! and the account's own SSH key pair.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::common::write_file_mode;
use crate::config::{Config, HostRoot};
use crate::process::Cmd;
use crate::term;

pub const SUDOERS_DIR: &str = "/etc/sudoers.d";
pub const GROUP_FILE: &str = "/etc/group";

/// Groups the admin joins. `docker` lets the stack commands run without sudo.
pub const ADMIN_GROUPS: &[&str] = &["sudo", "docker"];

/// Key type generated for the admin account.
pub const KEY_FILE: &str = "id_ed25519";

/// Drop-in granting `user` sudo. `SUDO_NOPASSWD=yes` drops the password prompt.
pub fn sudoers_entry(user: &str, nopasswd: bool) -> String {
    if nopasswd {
        format!("{} ALL=(ALL) NOPASSWD:ALL\n", user)
    } else {
        format!("{} ALL=(ALL) ALL\n", user)
    }
}

/// Members of `group` in `/etc/group` content; `None` if the group is absent.
pub fn group_members(group_file: &str, group: &str) -> Option<Vec<String>> {
    group_file.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        (fields.len() == 4 && fields[0] == group).then(|| {
            fields[3]
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect()
        })
    })
}

/// `/etc/group` content with `user` appended to `group`.
///
/// `None` when nothing changes (group missing or already a member).
pub fn add_group_member(group_file: &str, group: &str, user: &str) -> Option<String> {
    let members = group_members(group_file, group)?;
    if members.iter().any(|m| m == user) {
        return None;
    }

    let mut out: Vec<String> = Vec::new();
    for line in group_file.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() == 4 && fields[0] == group {
            let mut members = members.clone();
            members.push(user.to_string());
            out.push(format!("{}:{}:{}:{}", fields[0], fields[1], fields[2], members.join(",")));
        } else {
            out.push(line.to_string());
        }
    }
    let mut text = out.join("\n");
    if group_file.ends_with('\n') {
        text.push('\n');
    }
    Some(text)
}

#[derive(Debug, Default)]
pub struct UserSummary {
    pub sudoers_written: bool,
    pub groups_joined: Vec<String>,
    pub key_generated: bool,
}

/// Give the admin sudo, the admin groups and a key pair.
pub fn configure(config: &Config) -> Result<UserSummary> {
    let root = &config.host_root;
    term::banner("Configuring admin user");

    let user = super::admin_user(config)?;
    term::detail(format!("Admin user: {}", user));
    let nopasswd = matches!(
        config.secrets.get("SUDO_NOPASSWD").as_deref(),
        Some("yes" | "true" | "1")
    );

    let mut summary = UserSummary::default();

    // Stage 1: sudoers drop-in
    summary.sudoers_written = install_sudoers(root, &user, nopasswd)?;

    // Stage 2: groups
    for group in ADMIN_GROUPS {
        if join_group(root, group, &user)? {
            summary.groups_joined.push(group.to_string());
        }
    }

    // Stage 3: key pair
    let home = super::home_dir(&super::read_passwd(root), &user);
    summary.key_generated = generate_key(root, &user, &root.path(home.join(".ssh")))?;

    Ok(summary)
}

/// Write `/etc/sudoers.d/<user>` (0440) unless present. The candidate is
/// checked with `visudo -cf` on the live host before it is moved in place;
/// sudo ignores names containing a dot, so the candidate is never active.
fn install_sudoers(root: &HostRoot, user: &str, nopasswd: bool) -> Result<bool> {
    let target = root.path(Path::new(SUDOERS_DIR).join(user));
    if target.exists() {
        term::skip(format!("{} already exists", target.display()));
        return Ok(false);
    }

    let candidate = target.with_file_name(format!("{}.homelab-new", user));
    write_file_mode(&candidate, sudoers_entry(user, nopasswd), 0o440)?;
    if root.is_live() {
        let checked = Cmd::new("visudo")
            .arg("-cf")
            .arg_path(&candidate)
            .error_msg("visudo rejected the sudoers drop-in")
            .run();
        if let Err(e) = checked {
            let _ = fs::remove_file(&candidate);
            return Err(e);
        }
    } else {
        term::skip(format!("visudo -cf (host root {})", root.root().display()));
    }
    fs::rename(&candidate, &target)
        .with_context(|| format!("Failed to install {}", target.display()))?;
    term::ok(format!("Installed {}", target.display()));
    Ok(true)
}

/// Add `user` to `group`: `usermod -aG` on the live host, a direct
/// `/etc/group` edit under a scratch root. Returns true if the user joined.
fn join_group(root: &HostRoot, group: &str, user: &str) -> Result<bool> {
    let path = root.path(GROUP_FILE);
    let content = fs::read_to_string(&path).unwrap_or_default();

    match group_members(&content, group) {
        None => {
            term::skip(format!("Group {} does not exist", group));
            Ok(false)
        }
        Some(members) if members.iter().any(|m| m == user) => {
            term::skip(format!("{} already in {}", user, group));
            Ok(false)
        }
        Some(_) => {
            if root.is_live() {
                Cmd::new("usermod")
                    .args(["-aG", group, user])
                    .error_msg(format!("Failed to add {} to {}", user, group))
                    .run()?;
            } else if let Some(updated) = add_group_member(&content, group, user) {
                write_file_mode(&path, updated, 0o644)?;
            }
            term::ok(format!("Added {} to {}", user, group));
            Ok(true)
        }
    }
}

/// Generate `~/.ssh/id_ed25519` when the account has no key pair yet.
fn generate_key(root: &HostRoot, user: &str, ssh_dir: &Path) -> Result<bool> {
    let key = ssh_dir.join(KEY_FILE);
    let public = public_key_path(&key);
    if key.exists() || public.exists() {
        term::skip(format!("{} already has a key pair", user));
        return Ok(false);
    }

    fs::create_dir_all(ssh_dir)
        .with_context(|| format!("Failed to create {}", ssh_dir.display()))?;
    fs::set_permissions(ssh_dir, fs::Permissions::from_mode(0o700))?;
    Cmd::new("ssh-keygen")
        .args(["-q", "-t", "ed25519", "-N", ""])
        .arg("-C")
        .arg(format!("{}@{}", user, crate::backup::hostname()))
        .arg("-f")
        .arg_path(&key)
        .error_msg("ssh-keygen failed")
        .run()?;
    if !key.is_file() {
        bail!("ssh-keygen did not create {}", key.display());
    }
    super::chown(root, user, ssh_dir, true)?;
    term::ok(format!("Generated {}", public.display()));
    Ok(true)
}

fn public_key_path(key: &Path) -> PathBuf {
    let mut name = key.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str = "root:x:0:\nsudo:x:27:\ndocker:x:999:bob\n";

    #[test]
    fn test_sudoers_entry() {
        assert_eq!(sudoers_entry("alice", false), "alice ALL=(ALL) ALL\n");
        assert_eq!(sudoers_entry("alice", true), "alice ALL=(ALL) NOPASSWD:ALL\n");
    }

    #[test]
    fn test_group_members() {
        assert_eq!(group_members(GROUPS, "sudo"), Some(vec![]));
        assert_eq!(group_members(GROUPS, "docker"), Some(vec!["bob".to_string()]));
        assert_eq!(group_members(GROUPS, "wheel"), None);
    }

    #[test]
    fn test_add_group_member() {
        let once = add_group_member(GROUPS, "sudo", "alice").unwrap();
        assert_eq!(once, "root:x:0:\nsudo:x:27:alice\ndocker:x:999:bob\n");

        let twice = add_group_member(&once, "docker", "alice").unwrap();
        assert!(twice.contains("\ndocker:x:999:bob,alice\n"));

        assert!(add_group_member(&twice, "docker", "alice").is_none());
        assert!(add_group_member(GROUPS, "wheel", "alice").is_none());
    }
}
