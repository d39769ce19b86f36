//! DNS command - Cloudflare record sync.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::dns::{self, SyncTiming};
use crate::term;

/// Execute `dns sync`.
pub fn cmd_dns_sync(config: &Config) -> Result<()> {
    term::banner("Syncing DNS records");
    let summary = dns::sync_from_secrets(&config.secrets, &SyncTiming::default())?;

    println!();
    println!("  Created:    {}", summary.created.len());
    println!("  Unproxied:  {}", summary.unproxied.len());
    println!("  Unchanged:  {}", summary.unchanged.len());
    if !summary.missing_vars.is_empty() {
        println!("  Not set:    {}", summary.missing_vars.join(", "));
    }

    if !summary.failed.is_empty() {
        bail!("{} record(s) failed to sync", summary.failed.len());
    }
    if !summary.unverified.is_empty() {
        bail!(
            "DNS propagation could not be verified for: {}",
            summary.unverified.join(", ")
        );
    }
    Ok(())
}
