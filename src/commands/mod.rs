//! CLI command handlers.
//!
//! Each submodule handles one top-level command:
//! - `preflight` - Check host tools, environment and secrets
//! - `show` - Display configuration
//! - `iso` - Preseed template and unattended ISO build
//! - `stack` - Compose stack lifecycle
//! - `backup` - Encrypted host backup and restore
//! - `host` - SSH, unattended upgrades and SMB mounts
//! - `dns` - Cloudflare record sync
//! - `traffic` - Traefik log analysis
//! - `scan` - Sensitive pattern scan

pub mod backup;
mod dns;
pub mod host;
pub mod iso;
mod preflight;
mod scan;
pub mod show;
pub mod stack;
mod traffic;

pub use backup::cmd_backup;
pub use dns::cmd_dns_sync;
pub use host::cmd_host;
pub use iso::cmd_iso;
pub use preflight::cmd_preflight;
pub use scan::cmd_scan;
pub use show::cmd_show;
pub use stack::cmd_stack;
pub use traffic::cmd_traffic;
