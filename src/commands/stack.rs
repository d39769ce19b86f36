//! Stack command - compose lifecycle.

use anyhow::Result;

use crate::config::Config;
use crate::dns::{self, SyncTiming};
use crate::stack::Stack;
use crate::term;

pub enum StackCommand {
    Up,
    Stop { keep: bool },
    Start,
    Status,
    Pull,
}

/// Execute a stack subcommand.
pub fn cmd_stack(command: StackCommand, config: &Config) -> Result<()> {
    let stack = Stack::new(config);
    match command {
        StackCommand::Up => stack.up(config)?,
        StackCommand::Stop { keep } => stack.stop(keep)?,
        StackCommand::Start => {
            term::banner("Starting homelab");
            // DNS first: Traefik requests certificates as soon as it is up
            if config.secrets.has_all(dns::REQUIRED_SECRETS) {
                let summary = dns::sync_from_secrets(&config.secrets, &SyncTiming::default())?;
                if !summary.is_clean() {
                    term::warn("DNS sync finished with errors; certificates may fail to issue");
                }
            } else {
                term::warn(format!(
                    "Skipping DNS sync: set {} to enable it",
                    dns::REQUIRED_SECRETS.join(", ")
                ));
            }
            stack.up(config)?;
        }
        StackCommand::Status => stack.status()?,
        StackCommand::Pull => stack.pull()?,
    }
    Ok(())
}
