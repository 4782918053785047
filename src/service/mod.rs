//! # The issuance orchestrator.
//!
//! [`Issuer`] composes the ACME client, the DNS provider, and the
//! key-value stores into the single operation the outside world calls:
//! [`Issuer::obtain_or_renew`]. Configured CA providers are tried in
//! declared order; the first to complete issuance wins, and its
//! certificate is written back to the cache for subsequent calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::dns::DnsProvider;
use crate::errors::{Error, Result};
use crate::schema::account::ExternalAccountBinding;
use crate::store::{AccountStore, CachedCert, CertStore, KvStore};

mod issue;
pub mod policy;

/// A certificate authority reachable over ACME.
#[derive(Debug, Clone)]
pub struct CaProvider {
    /// Display name, used in logs and carried on issued certificates.
    pub name: String,
    /// Absolute URL of the provider's ACME directory.
    pub directory_url: String,
    /// External account binding credentials, for CAs that require
    /// pre-provisioned accounts (e.g. ZeroSSL).
    pub eab: Option<ExternalAccountBinding>,
}

/// Configuration recognised by the orchestrator.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Ordered list of CA providers to try.
    pub providers: Vec<CaProvider>,
    /// Renew when fewer than this many whole days of validity remain.
    pub renew_before_days: i64,
    /// How long to wait after creating a TXT record before asking the
    /// CA to validate, covering DNS propagation.
    pub dns_propagation: Duration,
    /// Order `example.com` together with `*.example.com`.
    pub include_apex_with_wildcard: bool,
    /// Optional contact email registered on new ACME accounts.
    pub contact_email: Option<String>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        IssuerConfig {
            providers: Vec::new(),
            renew_before_days: 30,
            dns_propagation: Duration::from_secs(20),
            include_apex_with_wildcard: true,
            contact_email: None,
        }
    }
}

/// Certificate material returned to the caller.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    /// The domain the certificate covers.
    pub domain: String,
    /// The full PEM certificate chain.
    pub cert_pem: String,
    /// The private key as PKCS#8 PEM.
    pub key_pem: String,
    /// Expiry of the leaf certificate.
    pub not_after: DateTime<Utc>,
    /// The CA provider that issued the certificate.
    pub provider: String,
    /// Whether this material came from the cache without ACME traffic.
    pub cached: bool,
}

impl IssuedCert {
    fn from_cache(cached: CachedCert) -> Self {
        IssuedCert {
            domain: cached.domain,
            cert_pem: cached.cert_pem,
            key_pem: cached.key_pem,
            not_after: cached.not_after,
            provider: cached.provider,
            cached: true,
        }
    }
}

/// The certificate lifecycle manager.
pub struct Issuer {
    config: IssuerConfig,
    dns: Arc<dyn DnsProvider>,
    accounts: AccountStore,
    certs: CertStore,
    http: reqwest::Client,
}

impl std::fmt::Debug for Issuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Issuer")
            .field("providers", &self.config.providers.len())
            .field("dns", &self.dns.name())
            .finish()
    }
}

impl Issuer {
    /// Create an issuer from configuration, a DNS provider, and a
    /// durable key-value store.
    pub fn new(
        config: IssuerConfig,
        dns: Arc<dyn DnsProvider>,
        store: Arc<dyn KvStore>,
    ) -> Result<Self> {
        if config.providers.is_empty() {
            return Err(Error::Config("providers list is empty".into()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Issuer {
            config,
            dns,
            accounts: AccountStore::new(store.clone()),
            certs: CertStore::new(store),
            http,
        })
    }

    /// Return current certificate material for `domain`, issuing or
    /// renewing through the configured providers when the cache is
    /// missing or close to expiry.
    pub async fn obtain_or_renew(&self, domain: &str) -> Result<IssuedCert> {
        let domain = domain.to_ascii_lowercase();
        let now = Utc::now();

        if let Some(cached) = self.certs.load(&domain).await? {
            if !policy::needs_renewal(&cached, self.config.renew_before_days, now) {
                tracing::debug!(
                    domain = %domain,
                    not_after = %cached.not_after,
                    "serving certificate from cache"
                );
                return Ok(IssuedCert::from_cache(cached));
            }
            tracing::info!(
                domain = %domain,
                not_after = %cached.not_after,
                "cached certificate close to expiry, renewing"
            );
        }

        let mut failures = Vec::new();
        for provider in &self.config.providers {
            tracing::info!(domain = %domain, provider = %provider.name, "attempting issuance");
            match issue::issue_with_provider(self, provider, &domain).await {
                Ok(material) => {
                    let entry = CachedCert {
                        domain: domain.clone(),
                        cert_pem: material.cert_pem.clone(),
                        key_pem: material.key_pem.clone(),
                        not_after: material.not_after,
                        provider: material.provider.clone(),
                        updated_at: Utc::now(),
                    };
                    self.certs.save(&entry).await?;
                    tracing::info!(
                        domain = %domain,
                        provider = %material.provider,
                        not_after = %material.not_after,
                        "certificate issued"
                    );
                    return Ok(IssuedCert {
                        domain,
                        cert_pem: material.cert_pem,
                        key_pem: material.key_pem,
                        not_after: material.not_after,
                        provider: material.provider,
                        cached: false,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        domain = %domain,
                        provider = %provider.name,
                        %error,
                        "provider attempt failed"
                    );
                    failures.push(format!("{}: {error}", provider.name));
                }
            }
        }

        Err(Error::AllProvidersFailed { details: failures })
    }

    pub(crate) fn config(&self) -> &IssuerConfig {
        &self.config
    }

    pub(crate) fn dns(&self) -> &dyn DnsProvider {
        self.dns.as_ref()
    }

    pub(crate) fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}
