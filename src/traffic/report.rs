//! Text report.

use std::fmt::Write;

use super::analyzer::Analysis;

const RULE_WIDTH: usize = 80;

pub fn render_text(analysis: &Analysis, generated_at: &str) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{}", heavy);
    let _ = writeln!(out, "WEB TRAFFIC ANALYSIS REPORT - {}", generated_at);
    let _ = writeln!(out, "{}\n", heavy);

    if analysis.total == 0 {
        let _ = writeln!(out, "No connection attempts found in {} log lines.", analysis.lines);
        let _ = writeln!(out, "The Traefik container may be new, or its log format is not recognized.");
        return out;
    }

    let _ = writeln!(out, "Total connection attempts analyzed: {}", analysis.total);
    let _ = writeln!(out, "Rejected unknown hosts: {}", analysis.rejected_hosts);
    let _ = writeln!(out, "Connection errors/timeouts: {}", analysis.connection_errors);

    if !analysis.suspicious.is_empty() {
        let _ = writeln!(out, "\nSUSPICIOUS ACTIVITY DETECTED:\n{}", light);
        for (client, events) in &analysis.suspicious {
            let country = analysis
                .clients
                .get(client)
                .map(|c| c.country.as_str())
                .unwrap_or("Unknown");
            let _ = writeln!(out, "\nIP: {} ({})", client, country);
            let _ = writeln!(out, "Total suspicious events: {}", events.total);
            let _ = writeln!(out, "Sample events:");
            for (i, event) in events.samples.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. [{}] {} - Port: {}",
                    i + 1,
                    event.timestamp.as_deref().unwrap_or("unknown time"),
                    event.error.as_deref().unwrap_or("no error"),
                    event
                        .local_port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                );
                let _ = writeln!(
                    out,
                    "     Endpoint: {}",
                    event.endpoint.as_deref().unwrap_or("unknown")
                );
                let _ = writeln!(out, "     {}", event.raw);
            }
            if events.total > events.samples.len() {
                let _ = writeln!(out, "  ... and {} more", events.total - events.samples.len());
            }
        }
        let _ = writeln!(out, "{}", light);
    }

    let _ = writeln!(out, "\nTOP 10 CONNECTING IP ADDRESSES:\n{}", light);
    for (client, stats) in analysis.top_clients(10) {
        let _ = writeln!(out, "{} ({}):", client, stats.country);
        let _ = writeln!(out, "  Connection attempts: {}", stats.attempts);
        let ports: Vec<&str> = stats.ports.iter().map(String::as_str).collect();
        let _ = writeln!(out, "  Ports accessed: {}", ports.join(", "));
        if !stats.endpoints.is_empty() {
            let endpoints: Vec<&str> = stats.endpoints.iter().map(String::as_str).collect();
            let _ = writeln!(out, "  Endpoints: {}", endpoints.join(", "));
        }
        out.push('\n');
    }

    let _ = writeln!(out, "\nTOP 5 COUNTRIES:\n{}", light);
    for (country, count) in analysis.top_countries(5) {
        let _ = writeln!(out, "{}: {} clients", country, count);
    }

    let _ = writeln!(out, "\nERROR TYPES DISTRIBUTION:\n{}", light);
    for (error, count) in analysis.error_distribution() {
        let _ = writeln!(out, "{}: {} occurrences", error, count);
    }

    let _ = writeln!(out, "\n{}\nEND OF REPORT\n{}", heavy, heavy);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::geo::NoGeo;

    #[test]
    fn test_empty_report() {
        let analysis = Analysis::from_lines(["nothing to see"], &NoGeo);
        let text = render_text(&analysis, "2024-05-01 10:00:00");
        assert!(text.contains("WEB TRAFFIC ANALYSIS REPORT - 2024-05-01 10:00:00"));
        assert!(text.contains("No connection attempts found in 1 log lines."));
        assert!(!text.contains("TOP 10"));
    }

    #[test]
    fn test_report_sections() {
        let lines: Vec<String> = (0..7)
            .map(|i| format!("198.51.100.7 - - \"GET /wp-admin/{} HTTP/1.1\" Host: a.example", i))
            .collect();
        let analysis = Analysis::from_lines(lines.iter().map(String::as_str), &NoGeo);
        let text = render_text(&analysis, "now");
        assert!(text.contains("SUSPICIOUS ACTIVITY DETECTED:"));
        assert!(text.contains("IP: 198.51.100.7 (Unknown)"));
        assert!(text.contains("  ... and 2 more"));
        assert!(text.contains("  Connection attempts: 7"));
        assert!(text.contains("Unknown: 1 clients"));
        assert!(text.ends_with("END OF REPORT\n================================================================================\n"));
    }
}
