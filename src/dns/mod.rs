//! # DNS providers for DNS-01 challenges.
//!
//! The issuance flow publishes and removes TXT records through the
//! [`DnsProvider`] trait; [`CloudflareProvider`] is the bundled
//! implementation. Record creation is idempotent by `(name, content)` so
//! a concurrent issuance for the same domain cannot conflict at the DNS
//! layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub mod cloudflare;

pub use cloudflare::{CloudflareConfig, CloudflareProvider};

/// ACME challenge record name prefix.
pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge";

/// TTL for challenge records, in seconds.
pub const CHALLENGE_TTL: u32 = 60;

/// Build the DNS-01 record name for a domain.
///
/// Wildcard domains share the record of their apex:
/// `*.example.com` and `example.com` both map to
/// `_acme-challenge.example.com`.
pub fn dns01_record_name(domain: &str) -> String {
    let apex = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{ACME_CHALLENGE_PREFIX}.{}", apex.to_ascii_lowercase())
}

/// A TXT record as known to the DNS provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-assigned record id, used for deletion.
    pub id: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record content (the challenge digest, for TXT records).
    pub content: String,
    /// Record time-to-live in seconds.
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Record type, `TXT` for everything this crate creates.
    #[serde(rename = "type")]
    pub record_type: String,
}

/// The outcome of an idempotent TXT creation.
#[derive(Debug, Clone)]
pub struct CreatedRecord {
    /// The record now present in the zone.
    pub record: DnsRecord,
    /// Whether this call created the record. Cleanup only deletes
    /// records the issuance itself created.
    pub created: bool,
}

/// A DNS provider able to manage TXT records for DNS-01 challenges.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Provider display name, for logs and error messages.
    fn name(&self) -> &str;

    /// Resolve the zone id responsible for `domain`.
    async fn resolve_zone_id(&self, domain: &str) -> Result<String>;

    /// Ensure a TXT record `name` with `content` exists in the zone.
    ///
    /// Returns `created = false` when an identical record was already
    /// present.
    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
    ) -> Result<CreatedRecord>;

    /// Delete a record by id.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_name_strips_wildcard() {
        assert_eq!(dns01_record_name("example.com"), "_acme-challenge.example.com");
        assert_eq!(
            dns01_record_name("*.example.com"),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            dns01_record_name("*.Sub.Example.com"),
            "_acme-challenge.sub.example.com"
        );
    }
}
