//! Cloudflare-compatible DNS provider.
//!
//! Speaks the `/zones` and `/zones/{id}/dns_records` API shape with the
//! `{success, result, errors}` response envelope. Zone resolution
//! prefers a statically configured suffix map and falls back to walking
//! the domain's labels against the zones endpoint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::transport::{Transport, DEFAULT_RETRIES};

use super::{CreatedRecord, DnsProvider, DnsRecord, CHALLENGE_TTL};

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Error code Cloudflare returns when an identical record already
/// exists.
const DUPLICATE_RECORD_CODE: i64 = 81058;

const DNS_BODY_LIMIT: usize = 500;

/// Configuration for [`CloudflareProvider`].
#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    /// Base URL of the API, overridable for tests and compatible
    /// self-hosted implementations.
    pub api_base: String,
    /// Static suffix → zone id map consulted before the zones API.
    pub zone_map: BTreeMap<String, String>,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        CloudflareConfig {
            api_base: DEFAULT_API_BASE.to_owned(),
            zone_map: BTreeMap::new(),
        }
    }
}

/// DNS provider backed by the Cloudflare API.
pub struct CloudflareProvider {
    transport: Transport,
    token: String,
    config: CloudflareConfig,
}

impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_base", &self.config.api_base)
            .field("zones", &self.config.zone_map.len())
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider using `token` for bearer authentication.
    pub fn new(token: impl Into<String>, config: CloudflareConfig) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::Config("Cloudflare API token is empty".into()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(CloudflareProvider {
            transport: Transport::new(client),
            token,
            config,
        })
    }

    /// The longest suffix in the static zone map covering `domain`.
    fn zone_from_map(&self, domain: &str) -> Option<String> {
        self.config
            .zone_map
            .iter()
            .filter(|(suffix, _)| {
                domain == suffix.as_str() || domain.ends_with(&format!(".{suffix}"))
            })
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, zone_id)| zone_id.clone())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<ApiEnvelope<T>> {
        let request = self
            .transport
            .client()
            .get(url)
            .bearer_auth(&self.token)
            .build()?;
        let response = self.transport.execute(request, DEFAULT_RETRIES).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_envelope(status, &body)
    }

    async fn list_zone(&self, name: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/zones?name={name}&status=active&per_page=1",
            self.config.api_base
        );
        let envelope: ApiEnvelope<Vec<Zone>> = self.get_json(&url).await?;
        Ok(envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|zone| zone.id))
    }

    async fn list_txt_records(&self, zone_id: &str, name: &str) -> Result<Vec<DnsRecord>> {
        let url = format!(
            "{}/zones/{zone_id}/dns_records?type=TXT&name={name}&per_page=100",
            self.config.api_base
        );
        let envelope: ApiEnvelope<Vec<DnsRecord>> = self.get_json(&url).await?;
        Ok(envelope.result.unwrap_or_default())
    }

    async fn find_existing(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
    ) -> Result<Option<DnsRecord>> {
        let records = self.list_txt_records(zone_id, name).await?;
        Ok(records.into_iter().find(|record| {
            record.record_type == "TXT" && record.name == name && record.content == content
        }))
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &str {
        "cloudflare"
    }

    async fn resolve_zone_id(&self, domain: &str) -> Result<String> {
        let domain = domain
            .strip_prefix("*.")
            .unwrap_or(domain)
            .to_ascii_lowercase();

        if let Some(zone_id) = self.zone_from_map(&domain) {
            tracing::trace!(domain = %domain, zone_id = %zone_id, "zone resolved from static map");
            return Ok(zone_id);
        }

        // Walk labels from the full name down, stopping before the
        // single-label root.
        let mut candidate = domain.as_str();
        loop {
            if let Some(zone_id) = self.list_zone(candidate).await? {
                tracing::debug!(domain = %domain, zone = %candidate, zone_id = %zone_id, "zone resolved via API");
                return Ok(zone_id);
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest,
                _ => break,
            }
        }

        Err(Error::ZoneResolutionFailed { domain })
    }

    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
    ) -> Result<CreatedRecord> {
        if let Some(record) = self.find_existing(zone_id, name, content).await? {
            tracing::debug!(name = %name, record_id = %record.id, "TXT record already present");
            return Ok(CreatedRecord {
                record,
                created: false,
            });
        }

        let url = format!("{}/zones/{zone_id}/dns_records", self.config.api_base);
        let request = self
            .transport
            .client()
            .post(&url)
            .bearer_auth(&self.token)
            .json(&CreateRecordRequest {
                record_type: "TXT",
                name,
                content,
                ttl: CHALLENGE_TTL,
            })
            .build()?;
        let response = self.transport.execute(request, DEFAULT_RETRIES).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        match parse_envelope::<DnsRecord>(status, &body) {
            Ok(envelope) => {
                let record = envelope.result.ok_or_else(|| Error::DnsCreateFailed {
                    status,
                    body: truncate(body),
                })?;
                tracing::debug!(name = %name, record_id = %record.id, "TXT record created");
                Ok(CreatedRecord {
                    record,
                    created: true,
                })
            }
            Err(error) if is_duplicate(&error) => {
                // Lost a race with a concurrent issuance; adopt the
                // record that won.
                tracing::debug!(name = %name, "duplicate TXT record reported, re-listing");
                let record = self
                    .find_existing(zone_id, name, content)
                    .await?
                    .ok_or(error)?;
                Ok(CreatedRecord {
                    record,
                    created: false,
                })
            }
            Err(_) => Err(Error::DnsCreateFailed {
                status,
                body: truncate(body),
            }),
        }
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let url = format!(
            "{}/zones/{zone_id}/dns_records/{record_id}",
            self.config.api_base
        );
        let request = self
            .transport
            .client()
            .delete(&url)
            .bearer_auth(&self.token)
            .build()?;
        let response = self.transport.execute(request, DEFAULT_RETRIES).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if parse_envelope::<serde_json::Value>(status, &body).is_err() {
            return Err(Error::DnsDeleteFailed {
                status,
                body: truncate(body),
            });
        }
        tracing::debug!(record_id = %record_id, "TXT record deleted");
        Ok(())
    }
}

/// The `{success, result, errors}` response envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

/// Parse a provider response, converting HTTP-level and envelope-level
/// failures into a provider error carrying the first error code.
fn parse_envelope<T: serde::de::DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<ApiEnvelope<T>> {
    let envelope: ApiEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) => {
            return Err(Error::DnsApiError {
                status,
                code: None,
                message: truncate(body.to_owned()),
            })
        }
    };
    if !(200..300).contains(&status) || !envelope.success {
        let code = envelope.errors.first().map(|error| error.code);
        let message = envelope
            .errors
            .first()
            .map(|error| error.message.clone())
            .unwrap_or_default();
        return Err(Error::DnsApiError {
            status,
            code,
            message: truncate(message),
        });
    }
    Ok(envelope)
}

fn is_duplicate(error: &Error) -> bool {
    matches!(
        error,
        Error::DnsApiError {
            code: Some(DUPLICATE_RECORD_CODE),
            ..
        }
    )
}

fn truncate(mut body: String) -> String {
    if body.len() > DNS_BODY_LIMIT {
        let mut cut = DNS_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
