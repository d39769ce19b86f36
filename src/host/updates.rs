//! Unattended security upgrades (configure-auto-updates.sh).

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::sync::OnceLock;

use crate::common::{backup_once, write_file_mode};
use crate::config::Config;
use crate::term;

pub const AUTO_UPGRADES: &str = "/etc/apt/apt.conf.d/20auto-upgrades";
pub const UNATTENDED_UPGRADES: &str = "/etc/apt/apt.conf.d/50unattended-upgrades";

pub const AUTO_UPGRADES_CONTENT: &str = r#"APT::Periodic::Update-Package-Lists "1";
APT::Periodic::Unattended-Upgrade "1";
APT::Periodic::AutocleanInterval "7";
APT::Periodic::Download-Upgradeable-Packages "1";
"#;

const SECURITY_ORIGIN: &str = r#""origin=Debian,codename=${distro_codename},label=Debian-Security";"#;

/// Written when the distro file is missing.
pub const DEFAULT_UNATTENDED_CONFIG: &str = r#"Unattended-Upgrade::Origins-Pattern {
        "origin=Debian,codename=${distro_codename},label=Debian-Security";
        "origin=Debian,codename=${distro_codename}-security,label=Debian-Security";
};

Unattended-Upgrade::Package-Blacklist {
};

Unattended-Upgrade::AutoFixInterruptedDpkg "true";
Unattended-Upgrade::MinimalSteps "true";
Unattended-Upgrade::InstallOnShutdown "false";
Unattended-Upgrade::Remove-Unused-Kernel-Packages "true";
Unattended-Upgrade::Remove-New-Unused-Dependencies "true";
Unattended-Upgrade::Remove-Unused-Dependencies "true";
Unattended-Upgrade::Automatic-Reboot "false";
"#;

fn security_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^([ \t]*)(//[ \t]*)?("origin=Debian,codename=\$\{distro_codename\}(?:-security)?,label=Debian-Security";)"#,
        )
        .expect("valid regex")
    })
}

fn reboot_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*)Unattended-Upgrade::Automatic-Reboot[ \t]+"[^"]*";"#)
            .expect("valid regex")
    })
}

fn origins_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*Unattended-Upgrade::(?:Origins-Pattern|Allowed-Origins)[ \t]*\{[ \t]*$")
            .expect("valid regex")
    })
}

/// Enable the Debian-Security origin and force `Automatic-Reboot "false"`.
pub fn patch_unattended_config(content: &str) -> String {
    // Uncomment security origins
    let mut out = security_line().replace_all(content, "${1}${3}").into_owned();

    // No security origin at all: add one to the origins block
    if !security_line().is_match(&out) {
        if let Some(m) = origins_block().find(&out) {
            let insert = format!("\n        {}", SECURITY_ORIGIN);
            out.insert_str(m.end(), &insert);
        }
    }

    if reboot_line().is_match(&out) {
        out = reboot_line()
            .replace_all(&out, r#"${1}Unattended-Upgrade::Automatic-Reboot "false";"#)
            .into_owned();
    } else {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("Unattended-Upgrade::Automatic-Reboot \"false\";\n");
    }
    out
}

/// Security origin enabled (uncommented) in `content`.
pub fn security_enabled(content: &str) -> bool {
    security_line()
        .captures_iter(content)
        .any(|c| c.get(2).is_none())
}

pub fn configure(config: &Config) -> Result<()> {
    let root = &config.host_root;
    term::banner("Configuring unattended upgrades");

    let periodic = root.path(AUTO_UPGRADES);
    write_file_mode(&periodic, AUTO_UPGRADES_CONTENT, 0o644)?;
    term::ok(format!("Wrote {}", periodic.display()));

    let unattended = root.path(UNATTENDED_UPGRADES);
    if unattended.is_file() {
        let current = fs::read_to_string(&unattended)
            .with_context(|| format!("Failed to read {}", unattended.display()))?;
        let patched = patch_unattended_config(&current);
        if patched == current {
            term::skip(format!("{} already configured", unattended.display()));
        } else {
            backup_once(&unattended)?;
            write_file_mode(&unattended, &patched, 0o644)?;
            term::ok(format!("Patched {}", unattended.display()));
        }
        if !security_enabled(&patched) {
            term::warn("No Debian-Security origin found; security updates may not be applied");
        }
    } else {
        write_file_mode(&unattended, DEFAULT_UNATTENDED_CONFIG, 0o644)?;
        term::ok(format!("Wrote default {}", unattended.display()));
    }

    super::systemctl(root, &["enable", "unattended-upgrades"])?;
    super::systemctl(root, &["restart", "unattended-upgrades"])?;
    Ok(())
}
