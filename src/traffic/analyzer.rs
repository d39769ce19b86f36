//! Aggregation of parsed events.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::geo::GeoLookup;
use super::parse::{self, LogEvent};

/// Samples kept per suspicious client.
pub const MAX_SAMPLES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub attempts: usize,
    pub country: String,
    /// Local ports hit, `"unknown"` when the line did not say.
    pub ports: BTreeSet<String>,
    pub endpoints: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousEvent {
    pub timestamp: Option<String>,
    pub error: Option<String>,
    pub endpoint: Option<String>,
    pub local_port: Option<u16>,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousClient {
    pub total: usize,
    pub samples: Vec<SuspiciousEvent>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Analysis {
    pub lines: usize,
    pub total: usize,
    pub rejected_hosts: usize,
    pub connection_errors: usize,
    pub clients: BTreeMap<String, ClientStats>,
    /// Distinct clients per country.
    pub countries: BTreeMap<String, usize>,
    pub error_types: BTreeMap<String, usize>,
    pub suspicious: BTreeMap<String, SuspiciousClient>,
}

impl Analysis {
    /// Parse and aggregate every line.
    pub fn from_lines<'a, I, G>(lines: I, geo: &G) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        G: GeoLookup + ?Sized,
    {
        let mut analysis = Self::default();
        for line in lines {
            analysis.lines += 1;
            if parse::is_noise(line) {
                continue;
            }
            if let Some(event) = parse::parse_line(line) {
                analysis.record(event, geo);
            }
        }
        analysis
    }

    pub fn record<G: GeoLookup + ?Sized>(&mut self, event: LogEvent, geo: &G) {
        self.total += 1;

        if !self.clients.contains_key(&event.client) {
            let country = geo.country(&event.client);
            *self.countries.entry(country.clone()).or_default() += 1;
            self.clients.insert(
                event.client.clone(),
                ClientStats {
                    attempts: 0,
                    country,
                    ports: BTreeSet::new(),
                    endpoints: BTreeSet::new(),
                },
            );
        }
        let endpoint = event.endpoint();
        if let Some(stats) = self.clients.get_mut(&event.client) {
            stats.attempts += 1;
            stats.ports.insert(
                event
                    .local_port
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            );
            if let Some(ref endpoint) = endpoint {
                stats.endpoints.insert(endpoint.clone());
            }
        }

        if let Some(ref error) = event.error {
            *self.error_types.entry(error.to_string()).or_default() += 1;
            if *error == parse::ErrorKind::HostRejected {
                self.rejected_hosts += 1;
            } else if error.is_connection_error() {
                self.connection_errors += 1;
            }
        }

        if event.suspicious {
            let entry = self
                .suspicious
                .entry(event.client.clone())
                .or_insert_with(|| SuspiciousClient {
                    total: 0,
                    samples: Vec::new(),
                });
            entry.total += 1;
            if entry.samples.len() < MAX_SAMPLES {
                entry.samples.push(SuspiciousEvent {
                    timestamp: event.timestamp,
                    error: event.error.map(|e| e.to_string()),
                    endpoint,
                    local_port: event.local_port,
                    raw: event.raw,
                });
            }
        }
    }

    /// Clients by attempts, busiest first (ties by address).
    pub fn top_clients(&self, n: usize) -> Vec<(&str, &ClientStats)> {
        let mut clients: Vec<_> = self.clients.iter().map(|(k, v)| (k.as_str(), v)).collect();
        clients.sort_by(|a, b| b.1.attempts.cmp(&a.1.attempts).then(a.0.cmp(b.0)));
        clients.truncate(n);
        clients
    }

    pub fn top_countries(&self, n: usize) -> Vec<(&str, usize)> {
        ranked(&self.countries, n)
    }

    pub fn error_distribution(&self) -> Vec<(&str, usize)> {
        ranked(&self.error_types, usize::MAX)
    }
}

fn ranked(counts: &BTreeMap<String, usize>, n: usize) -> Vec<(&str, usize)> {
    let mut out: Vec<_> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    out.truncate(n);
    out
}
