//! Country lookup for client addresses.

use regex::Regex;
use std::sync::OnceLock;

use crate::process::{self, Cmd};

pub const UNKNOWN_COUNTRY: &str = "Unknown";

pub trait GeoLookup {
    /// Country for `client`, or [`UNKNOWN_COUNTRY`].
    fn country(&self, client: &str) -> String;
}

/// `geoiplookup` from geoip-bin.
pub struct GeoIpLookup;

impl GeoIpLookup {
    /// `None` when the tool is not installed.
    pub fn detect() -> Option<Self> {
        process::exists("geoiplookup").then_some(Self)
    }
}

impl GeoLookup for GeoIpLookup {
    fn country(&self, client: &str) -> String {
        match Cmd::new("geoiplookup").arg(client).allow_fail().run() {
            Ok(result) => parse_geoiplookup(&result.stdout),
            Err(e) => {
                tracing::debug!(client, error = %e, "geoiplookup failed");
                UNKNOWN_COUNTRY.to_string()
            }
        }
    }
}

/// Lookups disabled.
pub struct NoGeo;

impl GeoLookup for NoGeo {
    fn country(&self, _client: &str) -> String {
        UNKNOWN_COUNTRY.to_string()
    }
}

/// `GeoIP Country Edition: US, United States` -> `US`
pub fn parse_geoiplookup(output: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"GeoIP Country Edition: ([^,\n]+)").expect("valid regex"));
    re.captures(output)
        .map(|c| c[1].trim().to_string())
        .filter(|c| !c.starts_with("IP Address not found"))
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
}
