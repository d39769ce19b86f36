//! Environment checks (privileges, directories, secrets).

use crate::config::Config;
use crate::dns;
use crate::process::Cmd;

use super::types::CheckResult;

/// Check privileges, the compose stack and the docker daemon.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match Cmd::new("id").arg("-u").allow_fail().run() {
        Ok(r) if r.stdout_trimmed() == "0" => results.push(CheckResult::pass("root privileges")),
        Ok(_) => results.push(CheckResult::warn(
            "root privileges",
            "Not running as root. Host configuration, mounts and restores need sudo.",
        )),
        Err(e) => results.push(CheckResult::warn("root privileges", &e.to_string())),
    }

    if config.secrets_dir.is_dir() {
        results.push(CheckResult::pass_with(
            "secrets directory",
            &config.secrets_dir.display().to_string(),
        ));
    } else {
        results.push(CheckResult::fail(
            "secrets directory",
            &format!("{} does not exist", config.secrets_dir.display()),
        ));
    }

    let compose_file = config.compose_file();
    if compose_file.is_file() {
        results.push(CheckResult::pass_with("compose file", &compose_file.display().to_string()));
    } else {
        results.push(CheckResult::fail(
            "compose file",
            &format!("{} not found (set HOMELAB_STACK_DIR)", compose_file.display()),
        ));
    }

    // Output dir must be writable for ISO builds
    match std::fs::create_dir_all(&config.output_dir) {
        Ok(_) => {
            let marker = config.output_dir.join(".preflight-test");
            match std::fs::write(&marker, "test") {
                Ok(_) => {
                    let _ = std::fs::remove_file(&marker);
                    results.push(CheckResult::pass("output directory writable"));
                }
                Err(e) => results.push(CheckResult::fail(
                    "output directory writable",
                    &format!("Cannot write to {}: {}", config.output_dir.display(), e),
                )),
            }
        }
        Err(e) => results.push(CheckResult::fail(
            "output directory writable",
            &format!("Cannot create {}: {}", config.output_dir.display(), e),
        )),
    }

    if crate::process::exists("docker") {
        let info = Cmd::new("docker")
            .args(["info", "--format", "{{.ServerVersion}}"])
            .allow_fail()
            .run();
        match info {
            Ok(r) if r.success() => results.push(CheckResult::pass_with(
                "docker daemon",
                &format!("server {}", r.stdout_trimmed()),
            )),
            Ok(r) => results.push(CheckResult::warn(
                "docker daemon",
                &format!("Not reachable: {}", r.stderr_trimmed()),
            )),
            Err(e) => results.push(CheckResult::warn("docker daemon", &e.to_string())),
        }
    }

    results
}

/// Check that each feature's secrets are complete.
pub fn check_secrets(config: &Config) -> Vec<CheckResult> {
    let groups: [(&str, &[&str]); 3] = [
        ("Cloudflare DNS secrets", dns::REQUIRED_SECRETS),
        ("backup passphrase", &["BACKUP_PASSPHRASE"]),
        ("preseed identity", &["PRESEED_HOSTNAME", "PRESEED_USERNAME"]),
    ];

    groups
        .iter()
        .map(|(name, keys)| {
            let missing: Vec<&str> = keys
                .iter()
                .copied()
                .filter(|k| config.secrets.get(k).is_none())
                .collect();
            if missing.is_empty() {
                CheckResult::pass(name)
            } else {
                CheckResult::warn(name, &format!("missing {}", missing.join(", ")))
            }
        })
        .collect()
}
