//! Minimal Cloudflare API v4 client for zone DNS records.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DnsApi, DnsRecord, RecordRequest};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Errors at the Cloudflare API boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cloudflare API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid API token: {0}")]
    Token(String),
}

/// Response envelope shared by every v4 endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct Cloudflare {
    http: reqwest::Client,
    records_url: String,
}

impl Cloudflare {
    pub fn new(api_token: &str, zone_id: &str) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_token))
            .map_err(|e| ApiError::Token(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("homelab/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            records_url: format!("{}/zones/{}/dns_records", API_BASE, zone_id),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|_| ApiError::Api {
            status: status.as_u16(),
            message: truncate(&body, 200),
        })?;

        match envelope.result {
            Some(result) if envelope.success && status.is_success() => Ok(result),
            _ => Err(ApiError::Api {
                status: status.as_u16(),
                message: describe(&envelope.errors),
            }),
        }
    }
}

impl DnsApi for Cloudflare {
    async fn find(&self, fqdn: &str) -> Result<Option<DnsRecord>, ApiError> {
        tracing::debug!(fqdn, "listing DNS records");
        let response = self
            .http
            .get(&self.records_url)
            .query(&[("name", fqdn)])
            .send()
            .await?;
        let records: Vec<DnsRecord> = Self::decode(response).await?;
        Ok(records.into_iter().next())
    }

    async fn create(&self, request: &RecordRequest) -> Result<DnsRecord, ApiError> {
        tracing::debug!(name = %request.name, "creating DNS record");
        let response = self.http.post(&self.records_url).json(request).send().await?;
        Self::decode(response).await
    }

    async fn update(&self, id: &str, request: &RecordRequest) -> Result<DnsRecord, ApiError> {
        tracing::debug!(id, name = %request.name, "updating DNS record");
        let response = self
            .http
            .put(format!("{}/{}", self.records_url, id))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_record_list() {
        let body = r#"{
            "success": true,
            "errors": [],
            "messages": [],
            "result": [{
                "id": "372e67954025e0ba6aaa6d586b9e0b59",
                "type": "CNAME",
                "name": "media.example.org",
                "content": "example.org",
                "proxied": true,
                "ttl": 1
            }]
        }"#;
        let envelope: Envelope<Vec<DnsRecord>> = serde_json::from_str(body).unwrap();
        let records = envelope.result.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].proxied);
        assert_eq!(records[0].record_type, "CNAME");
    }

    #[test]
    fn test_error_description() {
        let body = r#"{"success": false, "errors": [{"code": 9109, "message": "Invalid access token"}], "result": null}"#;
        let envelope: Envelope<Vec<DnsRecord>> = serde_json::from_str(body).unwrap();
        assert!(!envelope.success);
        assert_eq!(describe(&envelope.errors), "[9109] Invalid access token");
    }

    #[test]
    fn test_bad_token_characters_are_rejected() {
        assert!(matches!(
            Cloudflare::new("bad\ntoken", "zone"),
            Err(ApiError::Token(_))
        ));
    }
}
