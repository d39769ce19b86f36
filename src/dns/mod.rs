//! DNS sync for the stack's public hostnames.
//!
//! Every service subdomain becomes a DNS-only (unproxied) CNAME to the apex
//! domain. Traefik's ACME challenges need the records to resolve to the host
//! directly, so proxied records are switched off rather than left alone.

pub mod cloudflare;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Secrets;
use crate::term;

pub use cloudflare::{ApiError, Cloudflare};

/// Secrets the sync cannot run without.
pub const REQUIRED_SECRETS: &[&str] = &["CLOUDFLARE_API_TOKEN", "CLOUDFLARE_ZONE_ID", "DOMAIN"];

/// Variables naming the stack's subdomains.
pub const SUBDOMAIN_VARS: &[&str] = &[
    "DASHBOARD_SUBDOMAIN",
    "AUTHELIA_SUBDOMAIN",
    "GLANCES_SUBDOMAIN",
    "JELLYFIN_SUBDOMAIN",
    "WIREGUARD_SUBDOMAIN",
];

pub const RECORD_TTL: u32 = 3600;

/// A zone record as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub ttl: u32,
}

/// Body for create/update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRequest {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
}

impl RecordRequest {
    /// DNS-only CNAME `fqdn -> domain`.
    pub fn cname(fqdn: &str, domain: &str) -> Self {
        Self {
            record_type: "CNAME".to_string(),
            name: fqdn.to_string(),
            content: domain.to_string(),
            ttl: RECORD_TTL,
            proxied: false,
        }
    }
}

/// The calls the sync needs from a DNS provider.
#[allow(async_fn_in_trait)]
pub trait DnsApi {
    async fn find(&self, fqdn: &str) -> Result<Option<DnsRecord>, ApiError>;
    async fn create(&self, request: &RecordRequest) -> Result<DnsRecord, ApiError>;
    async fn update(&self, id: &str, request: &RecordRequest) -> Result<DnsRecord, ApiError>;
}

/// What to do with one subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    /// Record exists but is proxied; flip it to DNS-only.
    Unproxy { id: String },
    Unchanged,
}

pub fn decide(existing: Option<&DnsRecord>) -> Action {
    match existing {
        None => Action::Create,
        Some(record) if record.proxied => Action::Unproxy {
            id: record.id.clone(),
        },
        Some(_) => Action::Unchanged,
    }
}

/// Waits around propagation checks.
#[derive(Debug, Clone)]
pub struct SyncTiming {
    /// Before the first verification round.
    pub initial_wait: Duration,
    pub verify_attempts: u32,
    pub verify_delay: Duration,
    /// After verification, before Traefik starts ACME challenges.
    pub final_wait: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(30),
            verify_attempts: 20,
            verify_delay: Duration::from_secs(10),
            final_wait: Duration::from_secs(60),
        }
    }
}

impl SyncTiming {
    /// No waiting at all (tests).
    pub fn immediate() -> Self {
        Self {
            initial_wait: Duration::ZERO,
            verify_attempts: 1,
            verify_delay: Duration::ZERO,
            final_wait: Duration::ZERO,
        }
    }
}

/// Outcome of a sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: Vec<String>,
    pub unproxied: Vec<String>,
    pub unchanged: Vec<String>,
    /// Subdomain variables that were not set.
    pub missing_vars: Vec<String>,
    /// `(fqdn, error)` for records that could not be synced.
    pub failed: Vec<(String, String)>,
    /// Changed records that never showed up during verification.
    pub unverified: Vec<String>,
}

impl SyncSummary {
    pub fn changed(&self) -> Vec<String> {
        self.created
            .iter()
            .chain(self.unproxied.iter())
            .cloned()
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unverified.is_empty()
    }
}

/// Sync every subdomain. `subdomains` pairs variable names with their values.
pub async fn sync<A: DnsApi>(
    api: &A,
    domain: &str,
    subdomains: &[(String, Option<String>)],
    timing: &SyncTiming,
) -> SyncSummary {
    let mut summary = SyncSummary::default();

    for (var, value) in subdomains {
        let Some(sub) = value else {
            term::warn(format!("{} not set, skipping", var));
            summary.missing_vars.push(var.clone());
            continue;
        };
        let fqdn = format!("{}.{}", sub, domain);
        match sync_one(api, &fqdn, domain).await {
            Ok(Action::Create) => {
                term::ok(format!("Created CNAME {} -> {}", fqdn, domain));
                summary.created.push(fqdn);
            }
            Ok(Action::Unproxy { .. }) => {
                term::ok(format!("Switched {} to DNS-only", fqdn));
                summary.unproxied.push(fqdn);
            }
            Ok(Action::Unchanged) => {
                term::skip(format!("{} already exists and is not proxied", fqdn));
                summary.unchanged.push(fqdn);
            }
            Err(e) => {
                term::error(format!("Failed to sync {}: {}", fqdn, e));
                summary.failed.push((fqdn, e.to_string()));
            }
        }
    }

    let changed = summary.changed();
    if !changed.is_empty() {
        println!(
            "Waiting {}s for DNS propagation of {} record(s)...",
            timing.initial_wait.as_secs(),
            changed.len()
        );
        tokio::time::sleep(timing.initial_wait).await;

        for fqdn in &changed {
            if !verify(api, fqdn, timing).await {
                summary.unverified.push(fqdn.clone());
            }
        }

        println!(
            "Waiting {}s more before certificates are requested...",
            timing.final_wait.as_secs()
        );
        tokio::time::sleep(timing.final_wait).await;
    }

    summary
}

async fn sync_one<A: DnsApi>(api: &A, fqdn: &str, domain: &str) -> Result<Action, ApiError> {
    let existing = api.find(fqdn).await?;
    let action = decide(existing.as_ref());
    let request = RecordRequest::cname(fqdn, domain);
    match &action {
        Action::Create => {
            api.create(&request).await?;
        }
        Action::Unproxy { id } => {
            api.update(id, &request).await?;
        }
        Action::Unchanged => {}
    }
    Ok(action)
}

/// Poll until the record is visible. Returns false after the last attempt.
async fn verify<A: DnsApi>(api: &A, fqdn: &str, timing: &SyncTiming) -> bool {
    let attempts = timing.verify_attempts.max(1);
    for attempt in 1..=attempts {
        match api.find(fqdn).await {
            Ok(Some(_)) => {
                term::ok(format!("{} verified (attempt {}/{})", fqdn, attempt, attempts));
                return true;
            }
            Ok(None) => term::warn(format!(
                "{} not yet propagated (attempt {}/{})",
                fqdn, attempt, attempts
            )),
            Err(e) => term::warn(format!(
                "{} check failed (attempt {}/{}): {}",
                fqdn, attempt, attempts, e
            )),
        }
        if attempt < attempts {
            tokio::time::sleep(timing.verify_delay).await;
        }
    }
    term::error(format!(
        "DNS propagation verification failed for {} after {} attempts",
        fqdn, attempts
    ));
    false
}

/// Read the subdomain variables from secrets.
pub fn subdomains_from(secrets: &Secrets) -> Vec<(String, Option<String>)> {
    SUBDOMAIN_VARS
        .iter()
        .map(|var| (var.to_string(), secrets.get(var)))
        .collect()
}

/// Run a full sync against Cloudflare from a synchronous caller.
pub fn sync_from_secrets(secrets: &Secrets, timing: &SyncTiming) -> Result<SyncSummary> {
    let values = secrets.require(REQUIRED_SECRETS)?;
    let (token, zone_id, domain) = (&values[0], &values[1], &values[2]);
    let api = Cloudflare::new(token, zone_id)?;
    let subdomains = subdomains_from(secrets);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    term::step(format!("Syncing DNS records for {}...", domain));
    Ok(runtime.block_on(sync(&api, domain, &subdomains, timing)))
}
