//! # Durable state: ACME accounts and cached certificates.
//!
//! The core treats persistence as an opaque string key-value contract so
//! it can sit on top of whatever durable store the host platform offers.
//! Values are JSON blobs; a value that fails to parse is treated as
//! absent rather than an error, so a corrupted entry only costs a
//! re-issuance or re-registration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use elliptic_curve::JwkEcKey;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::Result;

/// String key to JSON blob storage. Writes are last-writer-wins; there
/// is no TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory [`KvStore`], for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// 32-bit FNV-1a over `data`, rendered as lower-case hex.
///
/// Not cryptographic; the account key only needs to be stable across
/// processes. A collision between directory URLs would surface as a
/// wrong-kid error on the next signed request.
pub(crate) fn fnv1a32_hex(data: &str) -> String {
    const FNV_OFFSET: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;

    let mut hash = FNV_OFFSET;
    for byte in data.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:08x}")
}

/// Persistent ACME account state, one entry per directory URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    /// The directory this account was registered with.
    pub directory_url: String,
    /// The account location URL, used as the JWS `kid`.
    pub kid: String,
    /// The private half of the account key.
    pub jwk_private: JwkEcKey,
    /// The public half of the account key.
    pub jwk_public: JwkEcKey,
}

/// Cached certificate material for one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCert {
    /// The domain the certificate covers.
    pub domain: String,
    /// The full PEM chain.
    pub cert_pem: String,
    /// The private key as PKCS#8 PEM.
    pub key_pem: String,
    /// Expiry of the leaf certificate.
    #[serde(rename = "notAfterIso")]
    pub not_after: DateTime<Utc>,
    /// Which CA provider issued this certificate.
    pub provider: String,
    /// When this cache entry was written.
    #[serde(rename = "updatedAtIso")]
    pub updated_at: DateTime<Utc>,
}

async fn load_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            tracing::warn!(key, %error, "discarding unparseable store entry");
            Ok(None)
        }
    }
}

/// Store facade for [`StoredAccount`] entries.
#[derive(Clone)]
pub struct AccountStore {
    store: Arc<dyn KvStore>,
}

impl AccountStore {
    /// Wrap a raw KV store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        AccountStore { store }
    }

    fn key(directory_url: &str) -> String {
        format!("acme:account:{}", fnv1a32_hex(directory_url))
    }

    /// Load the account registered with `directory_url`, if any.
    pub async fn load(&self, directory_url: &str) -> Result<Option<StoredAccount>> {
        load_json(self.store.as_ref(), &Self::key(directory_url)).await
    }

    /// Persist `account`, keyed by its directory URL.
    pub async fn save(&self, account: &StoredAccount) -> Result<()> {
        let value = serde_json::to_string(account)?;
        self.store
            .put(&Self::key(&account.directory_url), &value)
            .await
    }
}

/// Store facade for [`CachedCert`] entries.
#[derive(Clone)]
pub struct CertStore {
    store: Arc<dyn KvStore>,
}

impl CertStore {
    /// Wrap a raw KV store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        CertStore { store }
    }

    fn key(domain: &str) -> String {
        format!("cert:{}", domain.to_ascii_lowercase())
    }

    /// Load the cached certificate for `domain`, if any.
    pub async fn load(&self, domain: &str) -> Result<Option<CachedCert>> {
        load_json(self.store.as_ref(), &Self::key(domain)).await
    }

    /// Persist `cert`, replacing any previous entry for its domain.
    pub async fn save(&self, cert: &CachedCert) -> Result<()> {
        let value = serde_json::to_string(cert)?;
        self.store.put(&Self::key(&cert.domain), &value).await
    }
}
