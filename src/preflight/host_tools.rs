//! Host tool availability checks.

use crate::process;

use super::types::CheckResult;

/// `(tool, Debian package, what needs it)`.
pub const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("xorriso", "xorriso", "Required by `homelab iso build`"),
    ("md5sum", "coreutils", "Required to refresh the ISO md5sum.txt"),
    ("openssl", "openssl", "Required for backups and preseed password hashes"),
    ("tar", "tar", "Required for backups"),
    ("docker", "docker-ce", "Required by `homelab stack` and backups"),
    ("systemctl", "systemd", "Required to restart configured services"),
];

pub const OPTIONAL_TOOLS: &[(&str, &str, &str)] = &[
    ("mount.cifs", "cifs-utils", "Required by `homelab host smb`"),
    ("sshd", "openssh-server", "Required by `homelab host ssh`"),
    ("ssh-keygen", "openssh-client", "Required by `homelab host user`"),
    ("geoiplookup", "geoip-bin", "Adds countries to `homelab traffic analyze`"),
    ("docker-compose", "docker-compose", "Fallback when the compose plugin is missing"),
];

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (tool, package, purpose) in REQUIRED_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, true));
    }
    for (tool, package, purpose) in OPTIONAL_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, false));
    }

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::CheckStatus;

    #[test]
    fn test_missing_optional_tool_only_warns() {
        let result = check_tool_exists("nonexistent_tool_12345", "pkg", "testing", false);
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.details.unwrap().contains("'pkg'"));
    }

    #[test]
    fn test_present_tool_passes_with_path() {
        let result = check_tool_exists("sh", "dash", "testing", true);
        assert_eq!(result.status, CheckStatus::Pass);
        assert!(result.details.is_some());
    }
}
