//! Sensitive pattern scan (scan-sensitive-patterns.sh).
//!
//! Walks a tree and reports lines that look like committed credentials.
//! A line containing `homelab:allow` is never reported.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::term;

pub const ALLOW_MARKER: &str = "homelab:allow";

/// Files larger than this are skipped.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// `(kind, regex)` checked against every line.
pub const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("private key", r"-----BEGIN ((RSA|DSA|EC|OPENSSH|PGP) )?PRIVATE KEY( BLOCK)?-----"),
    ("AWS access key", r"\b(AKIA|ASIA)[0-9A-Z]{16}\b"),
    ("GitHub token", r"\b(gh[pousr]_[A-Za-z0-9]{36,}|github_pat_[A-Za-z0-9_]{22,})\b"),
    ("Slack token", r"\bxox[abposr]-[A-Za-z0-9-]{10,}"),
    ("bearer token", r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{20,}=*"),
    (
        "secret assignment",
        r#"(?i)\b[A-Z0-9_]*(PASSWORD|PASSWD|SECRET|API_KEY|APIKEY|TOKEN|PASSPHRASE)[A-Z0-9_]*\s*[:=]\s*["']?[^\s"'$<>{}();,]{8,}(?:["'\s,;]|$)"#,
    ),
];

pub struct Pattern {
    pub kind: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(kind: &str, pattern: &str) -> Result<Self> {
        Ok(Self {
            kind: kind.to_string(),
            regex: Regex::new(pattern).with_context(|| format!("Invalid pattern '{}'", pattern))?,
        })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

/// Built-in patterns plus `extra` (each reported as `custom: <regex>`).
pub fn patterns(extra: &[String]) -> Result<Vec<Pattern>> {
    let mut out = BUILTIN_PATTERNS
        .iter()
        .map(|(kind, pattern)| Pattern::new(kind, pattern))
        .collect::<Result<Vec<_>>>()?;
    for pattern in extra {
        out.push(Pattern::new(&format!("custom: {}", pattern), pattern)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: PathBuf,
    pub line: usize,
    pub kind: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.kind)
    }
}

/// Findings in one file's text. One finding per line at most.
pub fn scan_text(path: &Path, text: &str, patterns: &[Pattern]) -> Vec<Finding> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.contains(ALLOW_MARKER))
        .filter_map(|(i, line)| {
            patterns.iter().find(|p| p.is_match(line)).map(|p| Finding {
                path: path.to_path_buf(),
                line: i + 1,
                kind: p.kind.clone(),
            })
        })
        .collect()
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIP_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
}

/// Read a text file. `None` for large or binary files.
fn read_text(path: &Path, size: u64) -> Result<Option<String>> {
    if size > MAX_FILE_SIZE {
        tracing::debug!(path = %path.display(), size, "skipping large file");
        return Ok(None);
    }
    let mut bytes = Vec::with_capacity(size as usize);
    fs::File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .with_context(|| format!("Failed to read {}", path.display()))?;
    // NUL in the first 8 KiB means binary, like git's heuristic
    if bytes.iter().take(8192).any(|&b| b == 0) {
        tracing::debug!(path = %path.display(), "skipping binary file");
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Scan every file under `root`. Unreadable files are reported and skipped.
pub fn scan_tree(root: &Path, patterns: &[Pattern]) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let text = match read_text(entry.path(), size) {
            Ok(text) => text,
            Err(e) => {
                term::warn(format!("Skipping unreadable file: {:#}", e));
                continue;
            }
        };
        if let Some(text) = text {
            let shown = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let shown = if shown.as_os_str().is_empty() { entry.path() } else { shown };
            findings.extend(scan_text(shown, &text, patterns));
        }
    }
    Ok(findings)
}

/// `homelab scan`: print findings and fail if there are any.
pub fn run(root: &Path, extra: &[String]) -> Result<()> {
    if !root.exists() {
        bail!("Nothing to scan: {} does not exist", root.display());
    }
    let patterns = patterns(extra)?;
    term::step(format!("Scanning {} for sensitive patterns...", root.display()));

    let findings = scan_tree(root, &patterns)?;
    if findings.is_empty() {
        term::ok("No sensitive patterns found");
        return Ok(());
    }
    for finding in &findings {
        println!("{}", finding);
    }
    bail!(
        "{} potential secret(s) found. Remove them or mark intended lines with '{}'.",
        findings.len(),
        ALLOW_MARKER
    )
}
