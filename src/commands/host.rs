//! Host command - host configuration steps.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::host::{self, ssh::SshOptions};

pub enum HostCommand {
    Ssh {
        authorized_key: Option<String>,
        no_restart: bool,
    },
    Updates,
    Smb,
    User,
}

/// Execute a host subcommand.
pub fn cmd_host(command: HostCommand, config: &Config) -> Result<()> {
    match command {
        HostCommand::Ssh {
            authorized_key,
            no_restart,
        } => host::ssh::configure(
            config,
            &SshOptions {
                authorized_key,
                restart: !no_restart,
            },
        )?,
        HostCommand::Updates => host::updates::configure(config)?,
        HostCommand::User => {
            let summary = host::user::configure(config)?;
            if summary.groups_joined.iter().any(|g| g == "docker") {
                println!("\nLog out and back in for the docker group to take effect.");
            }
        }
        HostCommand::Smb => {
            let summary = host::smb::configure(config)?;
            if !summary.failed.is_empty() {
                bail!(
                    "{} share(s) could not be mounted: {}",
                    summary.failed.len(),
                    summary.failed.join(", ")
                );
            }
        }
    }
    Ok(())
}
