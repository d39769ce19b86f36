//! Traefik log line parsing.

use regex::{Regex, RegexSet, RegexSetBuilder};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Request patterns that indicate scanning or exploitation attempts.
pub const SUSPICIOUS_PATTERNS: &[&str] = &[
    r"wp-login\.php",
    r"wp-admin",
    r"\.git",
    r"\.env",
    r"/admin",
    r"/phpmyadmin",
    r"/solr",
    r"/jenkins",
    r"select.*from",
    r"union.*select",
    r"eval\(",
    r"exec\(",
    r#"["'].*<script"#,
];

/// Raw lines are cut to this many characters in samples.
pub const RAW_SAMPLE_LEN: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Reset,
    BrokenPipe,
    HostRejected,
    TlsHandshake,
    /// `level=error` with its `msg`.
    Other(String),
}

impl ErrorKind {
    /// Errors counted as connection errors in the summary.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Reset | ErrorKind::BrokenPipe | ErrorKind::TlsHandshake
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "Connection Timeout"),
            ErrorKind::Reset => write!(f, "Connection Reset"),
            ErrorKind::BrokenPipe => write!(f, "Broken Pipe"),
            ErrorKind::HostRejected => write!(f, "Host Rejected"),
            ErrorKind::TlsHandshake => write!(f, "TLS Handshake Error"),
            ErrorKind::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// One connection attempt pulled from a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Client IP, or the rejected host name for `rejecting "..."` lines.
    pub client: String,
    pub timestamp: Option<String>,
    pub error: Option<ErrorKind>,
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
    pub path: Option<String>,
    pub host: Option<String>,
    pub suspicious: bool,
    pub raw: String,
}

impl LogEvent {
    /// `host + path`, when the path is known.
    pub fn endpoint(&self) -> Option<String> {
        self.path
            .as_ref()
            .map(|p| format!("{}{}", self.host.as_deref().unwrap_or(""), p))
    }
}

struct Patterns {
    timestamp: Regex,
    tcp: Regex,
    standalone: [Regex; 4],
    error_msg: Regex,
    request: Regex,
    host_rule: Regex,
    host_header: Regex,
    suspicious: RegexSet,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("valid regex");
        Patterns {
            timestamp: re(r#"time="([^"]+)""#),
            tcp: re(r"tcp [\d.]+:(\d+)->([^:\s]+):(\d+)"),
            standalone: [
                re(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):"),
                re(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}) -"),
                re(r"client=(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})"),
                re(r#"rejecting "([^"]+)""#),
            ],
            error_msg: re(r#"msg="([^"]+)""#),
            request: re(r#""(?:GET|POST|PUT|DELETE|HEAD|PATCH|OPTIONS) ([^" ]+)"#),
            host_rule: re(r"Host\(`([^`]+)`\)"),
            host_header: re(r"Host: ([^\s,]+)"),
            suspicious: RegexSetBuilder::new(SUSPICIOUS_PATTERNS)
                .case_insensitive(true)
                .build()
                .expect("valid regex set"),
        }
    })
}

/// Startup chatter that never carries a client.
pub fn is_noise(line: &str) -> bool {
    line.contains("level=info msg=\"Starting provider") || line.contains("Configuration loaded")
}

pub fn is_suspicious(line: &str) -> bool {
    patterns().suspicious.is_match(line)
}

/// Private, loopback and link-local addresses. Non-IP clients are public.
///
/// Shared address space (100.64.0.0/10) counts as public: a carrier-grade
/// NAT peer is still a remote client. Documentation ranges (TEST-NET) also
/// count as public, so sample logs built on them are analyzed like real ones.
pub fn is_private(client: &str) -> bool {
    match client.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback() || ip.is_unspecified() || (ip.segments()[0] & 0xfe00) == 0xfc00
        }
        Err(_) => false,
    }
}

fn classify(line: &str) -> Option<ErrorKind> {
    if line.contains("read: connection timed out") {
        Some(ErrorKind::Timeout)
    } else if line.contains("read: connection reset by peer") {
        Some(ErrorKind::Reset)
    } else if line.contains("write: broken pipe") {
        Some(ErrorKind::BrokenPipe)
    } else if line.contains("Could not retrieve CanonizedHost, rejecting") {
        Some(ErrorKind::HostRejected)
    } else if line.contains("TLS handshake error") {
        Some(ErrorKind::TlsHandshake)
    } else if line.contains("level=error") {
        patterns()
            .error_msg
            .captures(line)
            .map(|c| ErrorKind::Other(c[1].to_string()))
    } else {
        None
    }
}

/// Parse a line into an event. `None` for lines without a public client.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    let p = patterns();

    let (client, local_port, remote_port) = match p.tcp.captures(line) {
        Some(c) => (c[2].to_string(), c[1].parse().ok(), c[3].parse().ok()),
        None => {
            let client = p
                .standalone
                .iter()
                .find_map(|re| re.captures(line).map(|c| c[1].to_string()))?;
            (client, None, None)
        }
    };
    if is_private(&client) {
        return None;
    }

    let host = p
        .host_rule
        .captures(line)
        .or_else(|| p.host_header.captures(line))
        .map(|c| c[1].to_string());

    Some(LogEvent {
        client,
        timestamp: p.timestamp.captures(line).map(|c| c[1].to_string()),
        error: classify(line),
        local_port,
        remote_port,
        path: p.request.captures(line).map(|c| c[1].to_string()),
        host,
        suspicious: is_suspicious(line),
        raw: line.chars().take(RAW_SAMPLE_LEN).collect(),
    })
}
