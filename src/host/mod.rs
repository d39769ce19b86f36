//! Host configuration: admin account, SSH hardening, unattended upgrades
//! and SMB mounts.
//!
//! All file edits go through [`HostRoot`], and service management and
//! mounting only run when the host root is the live system (`/`). Pointing
//! `HOMELAB_HOST_ROOT` at a scratch directory renders every file without
//! touching the machine.

pub mod smb;
pub mod ssh;
pub mod updates;
pub mod user;

use anyhow::{bail, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, HostRoot};
use crate::process::Cmd;
use crate::term;

/// Run `systemctl` on the live host; report and skip otherwise.
pub fn systemctl(root: &HostRoot, args: &[&str]) -> Result<()> {
    let shown = args.join(" ");
    if !root.is_live() {
        term::skip(format!("systemctl {} (host root {})", shown, root.root().display()));
        return Ok(());
    }
    Cmd::new("systemctl")
        .args(args)
        .error_msg(format!("systemctl {} failed", shown))
        .run()?;
    term::ok(format!("systemctl {}", shown));
    Ok(())
}

/// `chown owner:owner path` on the live host.
pub fn chown(root: &HostRoot, owner: &str, path: &Path, recursive: bool) -> Result<()> {
    if !root.is_live() {
        return Ok(());
    }
    let mut cmd = Cmd::new("chown");
    if recursive {
        cmd = cmd.arg("-R");
    }
    cmd.arg(format!("{}:{}", owner, owner)).arg_path(path).run()?;
    Ok(())
}

/// Contents of the host's `/etc/passwd` (empty if unreadable).
pub fn read_passwd(root: &HostRoot) -> String {
    fs::read_to_string(root.path("/etc/passwd")).unwrap_or_default()
}

/// Home directory of `user` according to passwd, as a host path.
pub fn home_dir(passwd: &str, user: &str) -> PathBuf {
    passwd
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.len() >= 6 && fields[0] == user).then(|| PathBuf::from(fields[5]))
        })
        .next()
        .unwrap_or_else(|| {
            if user == "root" {
                PathBuf::from("/root")
            } else {
                PathBuf::from("/home").join(user)
            }
        })
}

/// The non-root account that administers the host.
pub fn admin_user(config: &Config) -> Result<String> {
    let hints = ssh::UserHints::from_env(&config.secrets);
    match ssh::detect_admin_user(&hints, &read_passwd(&config.host_root)) {
        Some(user) => Ok(user),
        None => bail!(
            "Could not determine the admin user.\n\
             Run through sudo, or set SSH_ADMIN_USER in the secrets directory."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
alice:x:1000:1000:Alice,,,:/home/alice:/bin/bash\n\
svc:x:998:998::/srv/svc:/usr/sbin/nologin\n";

    #[test]
    fn test_home_dir_from_passwd() {
        assert_eq!(home_dir(PASSWD, "alice"), PathBuf::from("/home/alice"));
        assert_eq!(home_dir(PASSWD, "svc"), PathBuf::from("/srv/svc"));
        assert_eq!(home_dir(PASSWD, "bob"), PathBuf::from("/home/bob"));
        assert_eq!(home_dir("", "root"), PathBuf::from("/root"));
    }

    #[test]
    fn test_systemctl_skipped_off_live_root() {
        let root = HostRoot::new("/tmp/not-live");
        systemctl(&root, &["restart", "ssh"]).unwrap();
    }
}
