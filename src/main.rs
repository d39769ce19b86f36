//! homelab - unattended Debian ISO builder and homelab stack operator.
//!
//! Two halves:
//! - `iso`: remaster a Debian installer ISO with a preseed and patched
//!   bootloader menus
//! - everything else: operate the host the ISO installed (Compose stack,
//!   DNS, backups, SSH, upgrades, SMB mounts)

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use homelab::commands::{self, backup::BackupCommand, host::HostCommand, iso::IsoCommand, stack::StackCommand};
use homelab::config::Config;
use homelab::{iso, term, traffic};

#[derive(Parser)]
#[command(name = "homelab")]
#[command(about = "Unattended Debian ISO builder and homelab stack operator")]
#[command(
    after_help = "QUICK START:\n  homelab preflight                     Check tools and secrets\n  homelab iso build --source debian.iso Build the unattended ISO\n  homelab stack start                   Sync DNS and start the stack\n  homelab backup create                 Encrypted host backup"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run preflight checks (tools, environment, secrets)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Build an unattended Debian installer ISO
    Iso {
        #[command(subcommand)]
        command: IsoCmd,
    },

    /// Operate the Docker Compose stack
    Stack {
        #[command(subcommand)]
        command: StackCmd,
    },

    /// Encrypted host backups
    Backup {
        #[command(subcommand)]
        command: BackupCmd,
    },

    /// Configure the host (SSH, updates, SMB shares)
    Host {
        #[command(subcommand)]
        command: HostCmd,
    },

    /// Cloudflare DNS records for the stack
    Dns {
        #[command(subcommand)]
        command: DnsCmd,
    },

    /// Analyze Traefik traffic
    Traffic {
        #[command(subcommand)]
        command: TrafficCmd,
    },

    /// Scan a tree for committed secrets (exit code 1 on findings)
    Scan {
        /// Directory to scan (default: current directory)
        path: Option<PathBuf>,
        /// Extra regex to flag (repeatable)
        #[arg(long = "pattern")]
        patterns: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration (secret values are masked)
    Config,
}

#[derive(Subcommand)]
enum IsoCmd {
    /// Write the bundled preseed template for editing
    InitPreseed {
        /// Output file (default: ./preseed.cfg.tmpl)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Render a preseed template from the secrets to stdout
    Preseed {
        /// Template (default: bundled)
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Build the unattended ISO
    Build {
        /// Stock Debian installer ISO
        #[arg(long)]
        source: PathBuf,
        /// Preseed file, or a *.tmpl template to render (default: bundled template)
        #[arg(long)]
        preseed: Option<PathBuf>,
        /// Output ISO (default: <output dir>/debian-unattended.iso)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Boot menu timeout in seconds (at most one hour)
        #[arg(
            long,
            default_value_t = iso::DEFAULT_TIMEOUT_SECS,
            value_parser = clap::value_parser!(u32).range(0..=3600)
        )]
        timeout: u32,
        /// New volume label
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(Subcommand)]
enum StackCmd {
    /// Write .env and start the stack
    Up,
    /// Stop the stack (removes containers unless --keep)
    Stop {
        /// Stop containers without removing them
        #[arg(long)]
        keep: bool,
    },
    /// Sync DNS, then start the stack
    Start,
    /// Show container status
    Status,
    /// Pull newer images
    Pull,
}

#[derive(Subcommand)]
enum BackupCmd {
    /// Create an encrypted backup of the host
    Create {
        /// Where to write the archive (default: HOMELAB_BACKUP_DIR)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Restore an encrypted backup
    Restore {
        /// Archive to restore (*.tar.gz.enc)
        archive: PathBuf,
        /// Extract here instead of the host root
        #[arg(long)]
        target: Option<PathBuf>,
        /// Decrypt and list the contents only
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum HostCmd {
    /// Install a hardened sshd_config (key-only login)
    Ssh {
        /// Public key, or a file containing one, to authorize first
        #[arg(long)]
        authorized_key: Option<String>,
        /// Do not restart the ssh service
        #[arg(long)]
        no_restart: bool,
    },
    /// Enable unattended security upgrades
    Updates,
    /// Mount the SMB shares from the .smb secrets file
    Smb,
    /// Grant the admin sudo, the sudo/docker groups and an SSH key pair
    User,
}

#[derive(Subcommand)]
enum DnsCmd {
    /// Create or fix the CNAME records of the stack's subdomains
    Sync,
}

#[derive(Subcommand)]
enum TrafficCmd {
    /// Report on clients, countries and suspicious requests
    Analyze {
        /// Read this log file instead of `docker logs traefik`
        #[arg(long)]
        file: Option<PathBuf>,
        /// Emit JSON instead of the text report
        #[arg(long)]
        json: bool,
        /// Skip geoiplookup
        #[arg(long)]
        no_geo: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("homelab=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Iso { command } => {
            let iso_command = match command {
                IsoCmd::InitPreseed { output, force } => IsoCommand::InitPreseed { output, force },
                IsoCmd::Preseed { template } => IsoCommand::Preseed { template },
                IsoCmd::Build {
                    source,
                    preseed,
                    output,
                    timeout,
                    label,
                } => IsoCommand::Build {
                    source,
                    preseed,
                    output,
                    timeout,
                    label,
                },
            };
            commands::cmd_iso(&base_dir, iso_command, &config)?;
        }

        Commands::Stack { command } => {
            let stack_command = match command {
                StackCmd::Up => StackCommand::Up,
                StackCmd::Stop { keep } => StackCommand::Stop { keep },
                StackCmd::Start => StackCommand::Start,
                StackCmd::Status => StackCommand::Status,
                StackCmd::Pull => StackCommand::Pull,
            };
            commands::cmd_stack(stack_command, &config)?;
        }

        Commands::Backup { command } => {
            let backup_command = match command {
                BackupCmd::Create { output_dir } => BackupCommand::Create { output_dir },
                BackupCmd::Restore {
                    archive,
                    target,
                    dry_run,
                } => BackupCommand::Restore {
                    archive,
                    target,
                    dry_run,
                },
            };
            commands::cmd_backup(backup_command, &config)?;
        }

        Commands::Host { command } => {
            let host_command = match command {
                HostCmd::Ssh {
                    authorized_key,
                    no_restart,
                } => HostCommand::Ssh {
                    authorized_key,
                    no_restart,
                },
                HostCmd::Updates => HostCommand::Updates,
                HostCmd::Smb => HostCommand::Smb,
                HostCmd::User => HostCommand::User,
            };
            commands::cmd_host(host_command, &config)?;
        }

        Commands::Dns { command } => match command {
            DnsCmd::Sync => commands::cmd_dns_sync(&config)?,
        },

        Commands::Traffic { command } => match command {
            TrafficCmd::Analyze { file, json, no_geo } => {
                commands::cmd_traffic(traffic::TrafficOptions {
                    file,
                    json,
                    geo: !no_geo,
                })?;
            }
        },

        Commands::Scan { path, patterns } => {
            let root = match path {
                Some(path) => path,
                None => base_dir.clone(),
            };
            commands::cmd_scan(&root, &patterns)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            term::fatal(&e);
            ExitCode::FAILURE
        }
    }
}
