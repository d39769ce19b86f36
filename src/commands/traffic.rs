//! Traffic command - Traefik log analysis.

use anyhow::Result;

use crate::traffic::{self, TrafficOptions};

/// Execute `traffic analyze`.
pub fn cmd_traffic(options: TrafficOptions) -> Result<()> {
    traffic::analyze(&options)?;
    Ok(())
}
