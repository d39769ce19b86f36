//! Preflight check types and report.

use colored::Colorize;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - the affected commands will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: None,
        }
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if no check failed.
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let tag = match check.status {
                CheckStatus::Pass => "✓ [PASS]".green(),
                CheckStatus::Fail => "✗ [FAIL]".red(),
                CheckStatus::Warn => "⚠ [WARN]".yellow(),
            };

            match &check.details {
                Some(details) => println!("  {} {}: {}", tag, check.name, details),
                None => println!("  {} {}", tag, check.name),
            }
        }

        println!();
        let total = self.checks.len();
        let passed = self.count(CheckStatus::Pass);
        let failed = self.fail_count();
        let warned = self.warn_count();

        println!("Summary: {}/{} passed", passed, total);
        if failed > 0 {
            println!("         {} FAILED", failed);
        }
        if warned > 0 {
            println!("         {} warnings", warned);
        }
    }
}
