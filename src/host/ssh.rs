//! Hardened OpenSSH server configuration (configure-ssh-server.sh).

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::common::{append_line_if_missing, backup_once, write_file_mode};
use crate::config::{Config, Secrets};
use crate::process::{self, Cmd};
use crate::term;

pub const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

/// Accounts that are never picked as the admin user.
const SYSTEM_USERS: &[&str] = &["root", "nobody", "systemd"];

/// Sources for the admin user name, in priority order.
#[derive(Debug, Clone, Default)]
pub struct UserHints {
    pub sudo_user: Option<String>,
    pub logname: Option<String>,
    /// `SSH_ADMIN_USER` from the secrets.
    pub configured: Option<String>,
}

impl UserHints {
    pub fn from_env(secrets: &Secrets) -> Self {
        Self {
            sudo_user: env::var("SUDO_USER").ok(),
            logname: env::var("LOGNAME").ok(),
            configured: secrets.get("SSH_ADMIN_USER"),
        }
    }
}

/// Pick the admin user: `SUDO_USER`, then `LOGNAME`, then the first account
/// in passwd with a home under `/home`, then the configured name.
pub fn detect_admin_user(hints: &UserHints, passwd: &str) -> Option<String> {
    let usable = |name: &Option<String>| {
        name.as_ref()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty() && n != "root")
    };

    usable(&hints.sudo_user)
        .or_else(|| usable(&hints.logname))
        .or_else(|| first_home_user(passwd))
        .or_else(|| usable(&hints.configured))
}

fn first_home_user(passwd: &str) -> Option<String> {
    passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 6 {
            return None;
        }
        let (name, home) = (fields[0], fields[5]);
        (!SYSTEM_USERS.contains(&name) && home.starts_with("/home/")).then(|| name.to_string())
    })
}

/// Knobs for the rendered sshd_config.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub port: u16,
    pub admin_user: String,
    /// Allow root with a key (`prohibit-password`); otherwise no root login.
    pub root_login: bool,
}

impl SshSettings {
    pub fn from_secrets(secrets: &Secrets, admin_user: String) -> Result<Self> {
        let port = match secrets.get("SSH_PORT") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("SSH_PORT must be a port number, got '{}'", v))?,
            None => 22,
        };
        let root_login = matches!(
            secrets.get("SSH_ROOT_LOGIN").as_deref(),
            Some("yes" | "true" | "1")
        );
        Ok(Self {
            port,
            admin_user,
            root_login,
        })
    }
}

pub fn render_sshd_config(settings: &SshSettings) -> String {
    let allow_users = if settings.root_login {
        format!("{} root", settings.admin_user)
    } else {
        settings.admin_user.clone()
    };
    format!(
        "# Managed by homelab. The distro original is kept as sshd_config.bak.\n\
Include /etc/ssh/sshd_config.d/*.conf\n\
Port {port}\n\
PermitRootLogin {root}\n\
PasswordAuthentication no\n\
KbdInteractiveAuthentication no\n\
PubkeyAuthentication yes\n\
MaxAuthTries 3\n\
LoginGraceTime 30\n\
X11Forwarding no\n\
ClientAliveInterval 300\n\
ClientAliveCountMax 2\n\
UsePAM yes\n\
Subsystem sftp /usr/lib/openssh/sftp-server\n\
AllowUsers {users}\n",
        port = settings.port,
        root = if settings.root_login { "prohibit-password" } else { "no" },
        users = allow_users,
    )
}

/// A public key line or a path to a `.pub` file.
pub fn resolve_key(key_or_file: &str) -> Result<String> {
    let path = Path::new(key_or_file);
    let key = if path.is_file() {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        key_or_file.to_string()
    };
    let key = key.trim().to_string();
    if key.lines().count() != 1 {
        bail!("Expected exactly one public key, got {} lines", key.lines().count());
    }
    let mut fields = key.split_whitespace();
    let kind = fields.next().unwrap_or_default();
    let body = fields.next();
    if !(kind.starts_with("ssh-") || kind.starts_with("ecdsa-") || kind.starts_with("sk-")) || body.is_none() {
        bail!("'{}' does not look like an OpenSSH public key", truncate(&key, 40));
    }
    Ok(key)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Append `key` to `ssh_dir/authorized_keys` if absent. `.ssh` is 0700, the
/// file 0600. Returns true if the key was added.
pub fn add_authorized_key(ssh_dir: &Path, key: &str) -> Result<bool> {
    fs::create_dir_all(ssh_dir)
        .with_context(|| format!("Failed to create {}", ssh_dir.display()))?;
    fs::set_permissions(ssh_dir, fs::Permissions::from_mode(0o700))?;
    let file = ssh_dir.join("authorized_keys");
    let added = append_line_if_missing(&file, key)?;
    fs::set_permissions(&file, fs::Permissions::from_mode(0o600))?;
    Ok(added)
}

fn has_authorized_keys(ssh_dir: &Path) -> bool {
    fs::read_to_string(ssh_dir.join("authorized_keys"))
        .map(|c| c.lines().any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#')))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    pub authorized_key: Option<String>,
    pub restart: bool,
}

/// Install the hardened config for the admin user.
pub fn configure(config: &Config, options: &SshOptions) -> Result<()> {
    let root = &config.host_root;
    term::banner("Configuring SSH server");

    let user = super::admin_user(config)?;
    let settings = SshSettings::from_secrets(&config.secrets, user.clone())?;
    let home = super::home_dir(&super::read_passwd(root), &user);
    let ssh_dir = root.path(home.join(".ssh"));
    term::detail(format!("Admin user: {}", user));

    // Stage 1: Authorized key
    if let Some(ref key_or_file) = options.authorized_key {
        let key = resolve_key(key_or_file)?;
        if add_authorized_key(&ssh_dir, &key)? {
            term::ok(format!("Key added to {}", ssh_dir.join("authorized_keys").display()));
        } else {
            term::skip("Key already authorized");
        }
        super::chown(root, &user, &ssh_dir, true)?;
    }
    if !has_authorized_keys(&ssh_dir) {
        bail!(
            "{} has no authorized keys.\n\
             Password login is about to be disabled; pass --authorized-key first.",
            user
        );
    }

    // Stage 2: Back up and validate
    let target = root.path(SSHD_CONFIG);
    if let Some(backup) = backup_once(&target)? {
        term::ok(format!("Original saved to {}", backup.display()));
    }
    let candidate = candidate_path(&target);
    write_file_mode(&candidate, render_sshd_config(&settings), 0o644)?;
    if let Err(e) = validate(root.is_live(), &candidate) {
        let _ = fs::remove_file(&candidate);
        return Err(e);
    }

    // Stage 3: Install and restart
    fs::rename(&candidate, &target)
        .with_context(|| format!("Failed to install {}", target.display()))?;
    term::ok(format!("Installed {}", target.display()));

    if options.restart {
        super::systemctl(root, &["restart", "ssh"])?;
    } else {
        term::skip("Not restarting ssh (--no-restart)");
    }

    println!("\nConnect with: ssh -p {} {}@<host>", settings.port, user);
    Ok(())
}

fn candidate_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".homelab-new");
    PathBuf::from(name)
}

/// `sshd -t` on the candidate. Only meaningful against the live host, whose
/// include directory and host keys the check reads.
fn validate(live: bool, candidate: &Path) -> Result<()> {
    if !live || !process::exists("sshd") {
        term::skip("sshd -t (not validating outside the live host)");
        return Ok(());
    }
    Cmd::new("sshd")
        .arg("-t")
        .arg("-f")
        .arg_path(candidate)
        .error_msg("sshd rejected the generated configuration")
        .run()?;
    term::ok("sshd -t accepted the configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
nobody:x:65534:65534:nobody:/home/nobody:/usr/sbin/nologin\n\
alice:x:1000:1000:Alice:/home/alice:/bin/bash\n\
bob:x:1001:1001:Bob:/home/bob:/bin/bash\n";

    fn hints(sudo: Option<&str>, logname: Option<&str>, configured: Option<&str>) -> UserHints {
        UserHints {
            sudo_user: sudo.map(str::to_string),
            logname: logname.map(str::to_string),
            configured: configured.map(str::to_string),
        }
    }

    #[test]
    fn test_detect_prefers_sudo_user() {
        let h = hints(Some("carol"), Some("dave"), None);
        assert_eq!(detect_admin_user(&h, PASSWD).as_deref(), Some("carol"));
    }

    #[test]
    fn test_detect_skips_root_logname() {
        let h = hints(Some("root"), Some("root"), None);
        assert_eq!(detect_admin_user(&h, PASSWD).as_deref(), Some("alice"));
    }

    #[test]
    fn test_detect_falls_back_to_configured() {
        let h = hints(None, None, Some("erin"));
        assert_eq!(detect_admin_user(&h, "root:x:0:0::/root:/bin/sh\n").as_deref(), Some("erin"));
        assert_eq!(detect_admin_user(&hints(None, None, None), ""), None);
    }

    #[test]
    fn test_render_disables_passwords() {
        let config = render_sshd_config(&SshSettings {
            port: 2222,
            admin_user: "alice".into(),
            root_login: false,
        });
        assert!(config.contains("\nPort 2222\n"));
        assert!(config.contains("\nPasswordAuthentication no\n"));
        assert!(config.contains("\nPermitRootLogin no\n"));
        assert!(config.contains("\nMaxAuthTries 3\n"));
        assert!(config.ends_with("AllowUsers alice\n"));
    }

    #[test]
    fn test_render_root_login_keys_only() {
        let config = render_sshd_config(&SshSettings {
            port: 22,
            admin_user: "alice".into(),
            root_login: true,
        });
        assert!(config.contains("PermitRootLogin prohibit-password"));
        assert!(config.contains("AllowUsers alice root"));
    }

    #[test]
    fn test_resolve_key_rejects_garbage() {
        assert!(resolve_key("not a key").is_err());
        assert!(resolve_key("ssh-ed25519").is_err());
        let key = resolve_key("  ssh-ed25519 AAAAC3Nza alice@laptop \n").unwrap();
        assert_eq!(key, "ssh-ed25519 AAAAC3Nza alice@laptop");
    }

    #[test]
    fn test_add_authorized_key_once() {
        let dir = TempDir::new().unwrap();
        let ssh_dir = dir.path().join(".ssh");
        assert!(add_authorized_key(&ssh_dir, "ssh-ed25519 AAAA one").unwrap());
        assert!(!add_authorized_key(&ssh_dir, "ssh-ed25519 AAAA one").unwrap());

        let dir_mode = fs::metadata(&ssh_dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(ssh_dir.join("authorized_keys")).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
        assert!(has_authorized_keys(&ssh_dir));
    }
}
