//! Preflight checks for homelab operations.
//!
//! Validates host tools, secrets and the compose stack before anything
//! touches the host. Run with `homelab preflight` to check everything is
//! ready.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> Result<PreflightReport> {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    println!("Checking environment...");
    checks.extend(environment::check_environment(config));

    println!("Checking secrets...");
    checks.extend(environment::check_secrets(config));

    println!();

    Ok(PreflightReport { checks })
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config)?;
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above first.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

/// Fail fast when a tool a single command depends on is missing.
pub fn require_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !crate::process::exists(tool))
        .map(|(tool, package)| format!("{} (package: {})", tool, package))
        .collect();
    if !missing.is_empty() {
        bail!(
            "Required tool(s) not found in PATH: {}.\nRun 'homelab preflight' for details.",
            missing.join(", ")
        );
    }
    Ok(())
}
