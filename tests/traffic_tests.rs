//! Traffic analysis over a saved Traefik log.

use std::fs;
use tempfile::TempDir;

use homelab::traffic::{self, Analysis, NoGeo, TrafficOptions};

const LOG: &str = r#"time="2024-05-01T10:00:00Z" level=info msg="Configuration loaded from flags."
time="2024-05-01T10:00:01Z" level=debug msg="http: TLS handshake error from 203.0.113.9:51234: read tcp 172.27.0.4:443->203.0.113.9:51234: read: connection reset by peer"
time="2024-05-01T10:00:02Z" level=debug msg="http: TLS handshake error from 203.0.113.9:51240: read tcp 172.27.0.4:443->203.0.113.9:51240: read: connection timed out"
time="2024-05-01T10:00:03Z" level=debug msg="Could not retrieve CanonizedHost, rejecting "scanner.example""
198.51.100.7 - - [01/May/2024:10:00:04 +0000] "GET /wp-login.php HTTP/1.1" 404 19
client=192.168.1.20 level=debug msg="internal request"
"#;

#[test]
fn test_collect_logs_reads_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("traefik.log");
    fs::write(&path, LOG).unwrap();

    let text = traffic::collect_logs(Some(&path)).unwrap();
    assert_eq!(text, LOG);

    let err = traffic::collect_logs(Some(&dir.path().join("missing.log"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read log file"));
}

#[test]
fn test_analyze_saved_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("traefik.log");
    fs::write(&path, LOG).unwrap();

    let analysis = traffic::analyze(&TrafficOptions {
        file: Some(path),
        json: true,
        geo: false,
    })
    .unwrap();

    assert_eq!(analysis.lines, 6);
    // Noise and the private client are not counted
    assert_eq!(analysis.total, 4);
    assert_eq!(analysis.rejected_hosts, 1);
    assert_eq!(analysis.connection_errors, 2);

    let top = analysis.top_clients(1);
    assert_eq!(top[0].0, "203.0.113.9");
    assert_eq!(top[0].1.attempts, 2);
    assert!(top[0].1.ports.contains("443"));

    assert_eq!(analysis.suspicious.len(), 1);
    let wp = &analysis.suspicious["198.51.100.7"];
    assert_eq!(wp.total, 1);
    assert_eq!(wp.samples[0].endpoint.as_deref(), Some("/wp-login.php"));
}

#[test]
fn test_countries_count_distinct_clients() {
    let analysis = Analysis::from_lines(LOG.lines(), &NoGeo);
    assert_eq!(analysis.top_countries(5), vec![("Unknown", 3)]);
}
