//! Traefik traffic analysis (analyze_web_traffic).
//!
//! Reads Traefik's log, keeps lines with a public client, and reports the
//! busiest clients, countries, error types and anything that looks like a
//! scan or exploit attempt.

pub mod analyzer;
pub mod geo;
pub mod parse;
pub mod report;

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::PathBuf;

use crate::process::Cmd;
use crate::term;

pub use analyzer::Analysis;
pub use geo::{GeoIpLookup, GeoLookup, NoGeo};

pub const TRAEFIK_CONTAINER: &str = "traefik";

#[derive(Debug, Clone, Default)]
pub struct TrafficOptions {
    /// Read this file instead of `docker logs traefik`.
    pub file: Option<PathBuf>,
    pub json: bool,
    pub geo: bool,
}

/// The raw log text.
pub fn collect_logs(file: Option<&PathBuf>) -> Result<String> {
    if let Some(path) = file {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read log file {}", path.display()));
    }
    // Traefik logs to stderr; docker replays both streams
    let result = Cmd::new("docker")
        .args(["logs", TRAEFIK_CONTAINER])
        .error_msg("Failed to read Traefik logs. Is Docker running and the traefik container present?")
        .run()?;
    let mut text = result.stdout;
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&result.stderr);
    Ok(text)
}

pub fn analyze(options: &TrafficOptions) -> Result<Analysis> {
    let logs = collect_logs(options.file.as_ref())?;

    let geo: Box<dyn GeoLookup> = match (options.geo, GeoIpLookup::detect()) {
        (true, Some(lookup)) => Box::new(lookup),
        (true, None) => {
            term::warn("geoiplookup is not installed; countries will be Unknown (apt install geoip-bin)");
            Box::new(NoGeo)
        }
        (false, _) => Box::new(NoGeo),
    };

    if !options.json {
        term::step(format!("Processing {} log lines...", logs.lines().count()));
    }
    let analysis = Analysis::from_lines(logs.lines(), geo.as_ref());

    if options.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        print!("{}", report::render_text(&analysis, &now));
    }
    Ok(analysis)
}
