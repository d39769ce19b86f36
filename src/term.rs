//! Colored terminal output.
//!
//! Progress goes to stdout, warnings and errors to stderr. Colors are
//! dropped automatically when the stream is not a terminal.

use colored::Colorize;

/// Section header, e.g. `=== Building ISO ===`.
pub fn banner(title: &str) {
    println!("{}", format!("=== {} ===", title).bold().blue());
}

/// A step about to run.
pub fn step(msg: impl AsRef<str>) {
    println!("{}", msg.as_ref().blue());
}

/// Indented detail line under a step.
pub fn detail(msg: impl AsRef<str>) {
    println!("  {}", msg.as_ref());
}

pub fn ok(msg: impl AsRef<str>) {
    println!("{} {}", "[OK]".green().bold(), msg.as_ref());
}

pub fn skip(msg: impl AsRef<str>) {
    println!("{} {}", "[SKIP]".cyan(), msg.as_ref());
}

pub fn warn(msg: impl AsRef<str>) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg.as_ref().yellow());
}

pub fn error(msg: impl AsRef<str>) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg.as_ref().red());
}

/// Print an error chain the way the binary reports fatal failures.
pub fn fatal(err: &anyhow::Error) {
    error(err.to_string());
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".red(), cause);
    }
}
