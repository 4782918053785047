//! Errors which occur while obtaining or renewing a certificate.

use thiserror::Error;

/// A result type which uses [`Error`] as the error type.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Unified error type for the certificate issuance core.
///
/// Transient HTTP failures are retried inside the transport layer and DNS
/// cleanup failures are logged by the orchestrator; everything else
/// propagates through this type up to the provider-fallback boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// The issuer was constructed with unusable configuration, e.g. an
    /// empty provider list.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A PEM document was missing or failed to parse.
    #[error("malformed PEM document: {0}")]
    MalformedPem(String),

    /// A JSON Web Key could not be imported.
    #[error("malformed JWK: {0}")]
    MalformedJwk(String),

    /// An ECDSA signature was not valid ASN.1 DER, or its integers did
    /// not fit the P-256 field.
    #[error("malformed DER signature: {0}")]
    MalformedDerSignature(&'static str),

    /// Base64 input could not be decoded.
    #[error("invalid base64 data")]
    Decode(#[from] base64ct::Error),

    /// The `reqwest` library encountered an error while fulfilling an
    /// HTTP request, after any applicable retries.
    #[error("network request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The ACME server returned a non-success response after retries.
    #[error("ACME request to {url} failed with status {status}: {body}")]
    AcmeRequestFailed {
        /// HTTP status code of the failed response.
        status: u16,
        /// The request URL.
        url: String,
        /// Response body, truncated to 2000 bytes.
        body: String,
    },

    /// The ACME server omitted a header or field the protocol requires,
    /// such as `Location` on a new order, or a dns-01 challenge on an
    /// authorization.
    #[error("ACME protocol violation: {0}")]
    AcmeProtocolError(String),

    /// An authorization reached a terminal state other than `valid`.
    #[error("authorization for {identifier} failed: {detail}")]
    AuthorizationFailed {
        /// The identifier whose authorization failed.
        identifier: String,
        /// The server's problem detail, or the terminal status.
        detail: String,
    },

    /// An order reached the `invalid` state.
    #[error("order failed: {detail}")]
    OrderFailed {
        /// The server's problem detail, where supplied.
        detail: String,
    },

    /// An authorization or order did not reach a terminal state inside
    /// the polling budget.
    #[error("{resource} did not become valid within {waited_secs}s")]
    AcmePollExceeded {
        /// What was being polled ("authorization" or "order").
        resource: &'static str,
        /// Wall-clock seconds spent polling.
        waited_secs: u64,
    },

    /// The DNS provider API reported a failure in its response
    /// envelope.
    #[error("DNS provider API error (status {status}, code {code:?}): {message}")]
    DnsApiError {
        /// HTTP status code from the provider API.
        status: u16,
        /// The first provider error code, if one was supplied.
        code: Option<i64>,
        /// The first provider error message.
        message: String,
    },

    /// A TXT record could not be created with the DNS provider.
    #[error("DNS record creation failed with status {status}: {body}")]
    DnsCreateFailed {
        /// HTTP status code from the provider API.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// A TXT record could not be deleted. The orchestrator logs and
    /// swallows this so cleanup never masks the issuance outcome.
    #[error("DNS record deletion failed with status {status}: {body}")]
    DnsDeleteFailed {
        /// HTTP status code from the provider API.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// No DNS zone could be resolved for a domain.
    #[error(
        "no DNS zone found for {domain}; add the zone to the static zone \
         map or grant the API token zone read permission"
    )]
    ZoneResolutionFailed {
        /// The domain whose zone was being resolved.
        domain: String,
    },

    /// Every configured CA provider failed for this domain.
    #[error("all providers failed: {}", details.join("; "))]
    AllProvidersFailed {
        /// One failure message per provider, in the order tried.
        details: Vec<String>,
    },

    /// The key-value store reported a failure.
    #[error("store error: {0}")]
    Store(String),

    /// JSON payload serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The ES256 or CSR signing primitive failed.
    #[error("signing error: {0}")]
    Signing(#[from] signature::Error),

    /// DER encoding of a CSR or certificate failed.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// PKCS#8 key encoding failed.
    #[error("PKCS#8 error: {0}")]
    Pkcs8(#[from] pkcs8::Error),

    /// Public key (SPKI) encoding failed.
    #[error("SPKI error: {0}")]
    Spki(#[from] spki::Error),
}

impl Error {
    pub(crate) fn protocol(what: impl Into<String>) -> Self {
        Error::AcmeProtocolError(what.into())
    }
}
