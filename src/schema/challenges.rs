//! # ACME challenges.
//!
//! Challenges used to validate ownership of an identifier, as part of an
//! authorization. Only dns-01 is fulfilled by this crate; other types
//! are carried opaquely so deserialization never fails on them.

use serde::ser::SerializeMap;
use serde::{ser, Deserialize, Serialize};
use sha2::Digest;

use crate::encoding::base64url_encode;
use crate::key::KeyPair;
use crate::protocol::Url;

/// ACME challenge variety.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum Challenge {
    /// DNS-01 challenge where the client must set a DNS TXT record.
    #[serde(rename = "dns-01")]
    Dns01(Dns01Challenge),

    /// A challenge type this crate does not fulfil (http-01,
    /// tls-alpn-01, or anything newer).
    #[serde(other)]
    Unknown,
}

impl Challenge {
    /// Get the inner DNS-01 challenge, if this is a DNS-01 challenge.
    pub fn dns01(&self) -> Option<&Dns01Challenge> {
        match self {
            Challenge::Dns01(dns) => Some(dns),
            _ => None,
        }
    }
}

/// State of an ACME challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// This challenge has not been submitted.
    Pending,
    /// The client has indicated that this challenge is ready to be
    /// validated, but the server has not yet validated it.
    Processing,
    /// The server has validated this challenge.
    Valid,
    /// The server attempted validation and it failed.
    Invalid,
}

/// DNS-01 challenge.
///
/// The client proves control of a domain by publishing a TXT record at
/// `_acme-challenge.<domain>` whose value is derived from the challenge
/// token and the account key thumbprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dns01Challenge {
    url: Url,
    status: ChallengeStatus,
    token: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl Dns01Challenge {
    /// The token value used for challenge validation.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The URL for this challenge object with the ACME provider.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Status of the challenge.
    pub fn status(&self) -> ChallengeStatus {
        self.status
    }

    /// The problem document attached to a failed challenge, if any.
    pub fn error(&self) -> Option<&serde_json::Value> {
        self.error.as_ref()
    }

    /// The value of the DNS TXT record that should be created:
    /// `base64url(SHA-256(token || '.' || thumbprint))`.
    pub fn txt_value(&self, account_key: &KeyPair) -> String {
        let key_authorization = format!("{}.{}", self.token, account_key.thumbprint());
        let digest = sha2::Sha256::digest(key_authorization.as_bytes());
        base64url_encode(digest)
    }
}

/// An empty request to indicate that the challenge is ready to be
/// validated. Serializes as `{}`, which is distinct from the empty
/// POST-AS-GET payload.
#[derive(Debug, Default)]
pub struct ChallengeReadyRequest;

impl ser::Serialize for ChallengeReadyRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let map = serializer.serialize_map(Some(0))?;
        map.end()
    }
}
