//! One issuance attempt against one CA provider.
//!
//! The per-order state machine, from the orchestrator's view:
//! new order → per identifier (TXT set → challenge posted → poll →
//! TXT deleted) → finalize → poll order → download. Any failure is
//! terminal for this provider attempt; fallback happens in the caller.

use chrono::{DateTime, Utc};
use der::Decode;

use crate::dns::dns01_record_name;
use crate::encoding::{extract_first_certificate_pem, pem_to_der};
use crate::errors::{Error, Result};
use crate::key::{CertificateSigningRequest, KeyPair};
use crate::protocol::{AcmeClient, Url};
use crate::schema::{CreateAccount, Identifier};
use crate::store::StoredAccount;

use super::{CaProvider, Issuer};

/// Material produced by a successful attempt.
pub(super) struct IssuedMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
    pub provider: String,
}

/// The account identity used to sign requests.
struct AccountHandle {
    key: KeyPair,
    kid: String,
}

pub(super) async fn issue_with_provider(
    issuer: &Issuer,
    provider: &CaProvider,
    domain: &str,
) -> Result<IssuedMaterial> {
    let directory_url: Url = provider
        .directory_url
        .parse()
        .map_err(|_| Error::Config(format!("invalid directory URL: {}", provider.directory_url)))?;
    let mut client = AcmeClient::new(issuer.http().clone(), directory_url);

    let account = ensure_account(&mut client, issuer, provider).await?;

    let identifiers = identifiers_for(domain, issuer.config().include_apex_with_wildcard);
    let (order, order_url) = client
        .new_order(&account.key, &account.kid, identifiers.clone())
        .await?;
    tracing::debug!(order = %order_url, authorizations = order.authorizations.len(), "order created");

    // One zone covers the apex and the wildcard, so resolve it once.
    let zone_id = issuer.dns().resolve_zone_id(domain).await?;

    for authz_url in &order.authorizations {
        fulfil_authorization(issuer, &mut client, &account, &zone_id, authz_url).await?;
    }

    let tls_key = KeyPair::generate();
    let mut csr = CertificateSigningRequest::new();
    for identifier in &identifiers {
        csr.push(identifier.value());
    }
    let csr_der = csr.sign(&tls_key)?;

    client
        .finalize_order(&account.key, &account.kid, &order.finalize, csr_der)
        .await?;
    let valid_order = client
        .poll_order(&account.key, &account.kid, &order_url)
        .await?;
    let certificate_url = valid_order
        .certificate
        .ok_or_else(|| Error::protocol("valid order is missing the certificate URL"))?;

    let cert_pem = client
        .download_certificate(&account.key, &account.kid, &certificate_url)
        .await?;
    let key_pem = tls_key.to_pkcs8_pem()?;
    let not_after = leaf_not_after(&cert_pem)?;

    Ok(IssuedMaterial {
        cert_pem,
        key_pem,
        not_after,
        provider: provider.name.clone(),
    })
}

/// Set the TXT record, post the challenge, poll the authorization, and
/// clean up the record on every exit path.
async fn fulfil_authorization(
    issuer: &Issuer,
    client: &mut AcmeClient,
    account: &AccountHandle,
    zone_id: &str,
    authz_url: &Url,
) -> Result<()> {
    let authorization = client
        .authorization(&account.key, &account.kid, authz_url)
        .await?;
    let identifier = authorization.identifier.value().to_owned();

    if authorization.status.is_valid() {
        tracing::debug!(identifier = %identifier, "authorization already valid");
        return Ok(());
    }

    let challenge = authorization
        .dns01_challenge()
        .ok_or_else(|| Error::protocol(format!("no dns-01 challenge offered for {identifier}")))?
        .clone();

    let record_name = dns01_record_name(&identifier);
    let txt_value = challenge.txt_value(&account.key);

    let created = issuer
        .dns()
        .create_txt_record(zone_id, &record_name, &txt_value)
        .await?;
    tracing::debug!(
        identifier = %identifier,
        record = %record_name,
        created = created.created,
        "challenge TXT record in place"
    );

    let propagation = issuer.config().dns_propagation;
    if !propagation.is_zero() {
        tracing::debug!(seconds = propagation.as_secs(), "waiting for DNS propagation");
        tokio::time::sleep(propagation).await;
    }

    let outcome: Result<()> = async {
        client
            .respond_to_challenge(&account.key, &account.kid, challenge.url())
            .await?;
        client
            .poll_authorization(&account.key, &account.kid, authz_url)
            .await?;
        Ok(())
    }
    .await;

    // Only records this invocation created are removed; a pre-existing
    // matching record belongs to someone else. Deletion failures must
    // not mask the challenge outcome.
    if created.created {
        if let Err(error) = issuer.dns().delete_record(zone_id, &created.record.id).await {
            tracing::warn!(
                record_id = %created.record.id,
                %error,
                "failed to delete challenge TXT record"
            );
        }
    }

    outcome
}

async fn ensure_account(
    client: &mut AcmeClient,
    issuer: &Issuer,
    provider: &CaProvider,
) -> Result<AccountHandle> {
    if let Some(stored) = issuer.accounts().load(&provider.directory_url).await? {
        if stored.directory_url == provider.directory_url && !stored.kid.is_empty() {
            match KeyPair::from_jwk(&stored.jwk_private) {
                Ok(key) => {
                    tracing::debug!(kid = %stored.kid, "reusing stored ACME account");
                    return Ok(AccountHandle {
                        key,
                        kid: stored.kid,
                    });
                }
                Err(error) => {
                    tracing::warn!(%error, "stored account key unusable, registering a new account");
                }
            }
        }
    }

    let directory = client.directory().await?;
    let key = KeyPair::generate();

    let mut payload = CreateAccount {
        terms_of_service_agreed: Some(true),
        ..Default::default()
    };
    if let Some(email) = &issuer.config().contact_email {
        payload.contact = vec![format!("mailto:{email}")];
    }
    if let Some(eab) = &provider.eab {
        payload.external_account_binding =
            Some(eab.token(&key, directory.new_account.clone())?);
    }

    let response = client.post(&directory.new_account, &key, None, &payload).await?;
    let kid = response
        .location()
        .ok_or_else(|| Error::protocol("newAccount response is missing the Location header"))?;

    let stored = StoredAccount {
        directory_url: provider.directory_url.clone(),
        kid: kid.to_string(),
        jwk_private: key.to_jwk_private(),
        jwk_public: key.to_jwk_public(),
    };
    issuer.accounts().save(&stored).await?;
    tracing::info!(kid = %kid, provider = %provider.name, "registered ACME account");

    Ok(AccountHandle {
        key,
        kid: kid.to_string(),
    })
}

/// Identifiers for an order: a wildcard domain is paired with its apex
/// when configured. All values are lower-cased.
fn identifiers_for(domain: &str, include_apex_with_wildcard: bool) -> Vec<Identifier> {
    if let Some(apex) = domain.strip_prefix("*.") {
        if include_apex_with_wildcard {
            return vec![Identifier::dns(domain), Identifier::dns(apex)];
        }
    }
    vec![Identifier::dns(domain)]
}

/// Parse the `notAfter` of the first certificate in a PEM chain.
pub(crate) fn leaf_not_after(chain_pem: &str) -> Result<DateTime<Utc>> {
    let first = extract_first_certificate_pem(chain_pem)?;
    let der = pem_to_der(first)?;
    let certificate = x509_cert::Certificate::from_der(&der)?;
    let seconds = certificate
        .tbs_certificate
        .validity
        .not_after
        .to_unix_duration()
        .as_secs();
    DateTime::from_timestamp(seconds as i64, 0)
        .ok_or_else(|| Error::MalformedPem("certificate notAfter is out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_is_paired_with_apex() {
        let identifiers = identifiers_for("*.example.com", true);
        assert_eq!(
            identifiers,
            vec![
                Identifier::dns("*.example.com"),
                Identifier::dns("example.com")
            ]
        );
    }

    #[test]
    fn wildcard_pairing_can_be_disabled() {
        let identifiers = identifiers_for("*.example.com", false);
        assert_eq!(identifiers, vec![Identifier::dns("*.example.com")]);
    }

    #[test]
    fn plain_domain_orders_alone() {
        let identifiers = identifiers_for("www.example.com", true);
        assert_eq!(identifiers, vec![Identifier::dns("www.example.com")]);
    }
}
