//! # Account creation and management.
//!
//! Accounts are identified by their signing key for ACME. They can also
//! be bound to an external account provisioned at the CA out of band.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::key::{Jwk, KeyPair};
use crate::protocol::jose::{ProtectedHeader, SignedToken, UnsignedToken};
use crate::protocol::Url;

/// Account information returned by an ACME service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// The status of the account - valid, deactivated, or revoked.
    pub status: AccountStatus,

    /// A list of contact URIs for this account.
    #[serde(default)]
    pub contact: Vec<String>,

    /// If the terms of service were agreed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    /// The url to fetch a list of orders from the ACME provider.
    #[serde(default)]
    pub orders: Option<Url>,
}

/// Account objects are created in the "valid" state; deactivation by the
/// client or revocation by the server moves them to the corresponding
/// state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Account objects are created in the valid state.
    Valid,
    /// Accounts can be deactivated by the client.
    Deactivated,
    /// The server has revoked the account.
    Revoked,
}

/// Request payload for creating a new account.
#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccount {
    /// List of contact URIs (`mailto:` for email addresses).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,

    /// Has the user agreed to the terms of service?
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    /// Ask the ACME provider to only return an account if it already
    /// exists, don't create a new one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    /// External account binding information - used to associate an ACME
    /// account with an account established elsewhere with the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_binding: Option<ExternalAccountToken>,
}

/// Credentials for an external account binding, provided by the CA
/// operator (e.g. from the ZeroSSL dashboard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccountBinding {
    /// The key identifier issued by the CA.
    pub kid: String,
    /// The HMAC key issued by the CA, base64url encoded.
    pub hmac_key_b64: String,
}

impl ExternalAccountBinding {
    /// Create the signed inner JWS binding `account_key`'s public JWK to
    /// this external account.
    ///
    /// The protected header is `{alg: HS256, kid, url: <newAccount>}`,
    /// the payload is the base64url of the account's public JWK, and the
    /// signature is HMAC-SHA-256 under the CA-provisioned key.
    pub fn token(&self, account_key: &KeyPair, new_account_url: Url) -> Result<ExternalAccountToken> {
        let header = ProtectedHeader::external_account_binding(&self.kid, new_account_url);
        let token = UnsignedToken::post(header, account_key.public_jwk());
        Ok(ExternalAccountToken(token.sign_hmac(&self.hmac_key_b64)?))
    }
}

/// The signed external account binding token attached to `newAccount`.
#[derive(Debug, Serialize)]
pub struct ExternalAccountToken(SignedToken<Jwk>);
