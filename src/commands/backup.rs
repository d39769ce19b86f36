//! Backup command - encrypted host backup and restore.

use anyhow::Result;
use std::path::PathBuf;

use crate::backup::{self, RestoreOptions};
use crate::config::Config;
use crate::preflight;

pub enum BackupCommand {
    Create {
        output_dir: Option<PathBuf>,
    },
    Restore {
        archive: PathBuf,
        target: Option<PathBuf>,
        dry_run: bool,
    },
}

/// Execute a backup subcommand.
pub fn cmd_backup(command: BackupCommand, config: &Config) -> Result<()> {
    preflight::require_tools(&[("tar", "tar"), ("openssl", "openssl")])?;
    match command {
        BackupCommand::Create { output_dir } => {
            backup::create(config, output_dir.as_deref())?;
        }
        BackupCommand::Restore {
            archive,
            target,
            dry_run,
        } => {
            backup::restore(
                config,
                &RestoreOptions {
                    archive,
                    target,
                    dry_run,
                },
            )?;
        }
    }
    Ok(())
}
