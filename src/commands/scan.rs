//! Scan command - sensitive pattern scan.

use anyhow::Result;
use std::path::Path;

use crate::scan;

/// Execute `scan`.
pub fn cmd_scan(root: &Path, patterns: &[String]) -> Result<()> {
    scan::run(root, patterns)
}
