//! The ACME directory resource.

use serde::{Deserialize, Serialize};

use crate::protocol::Url;

/// Directories are the single source required to configure an ACME
/// client for use with a specific provider. They can be fetched as JSON
/// from an advertised directory URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    /// URL used to fetch a new Nonce via a HEAD request.
    pub new_nonce: Url,

    /// URL to create a new account.
    pub new_account: Url,

    /// URL to create a new certificate order.
    pub new_order: Url,

    /// (optional) URL to start a new pre-authorization.
    #[serde(default)]
    pub new_authz: Option<Url>,

    /// URL to revoke an existing certificate.
    #[serde(default)]
    pub revoke_cert: Option<Url>,

    /// URL to change the account signing key.
    #[serde(default)]
    pub key_change: Option<Url>,

    /// Additional metadata.
    #[serde(default)]
    pub meta: Option<Metadata>,
}

/// Additional information about an ACME directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// A URL to find and display terms of service for the ACME server.
    #[serde(default)]
    pub terms_of_service: Option<Url>,

    /// A URL for the default website of the ACME server.
    #[serde(default)]
    pub website: Option<Url>,

    /// CAA issuer domain names recognized by this server.
    #[serde(default)]
    pub caa_identities: Vec<String>,

    /// Whether an external account binding is required to register.
    #[serde(default)]
    pub external_account_required: Option<bool>,
}
