//! JSON Object Signing and Encryption primitives used in RFC 8555
//! to implement the ACME protocol.

use hmac::Mac;
use serde::{ser, Serialize};

use crate::encoding::{base64url_decode, Base64Data, Base64JSON};
use crate::errors::Result;
use crate::key::{Jwk, KeyPair};

use super::Url;

type HmacSha256 = hmac::Hmac<sha2::Sha256>;

/// Anti-replay nonce.
///
/// This is a token provided by the ACME server. Each nonce may only be
/// used once, and each reply from the ACME server should contain a new
/// nonce. A fresh nonce is also available from the directory's
/// `newNonce` endpoint.
///
/// The [`Nonce`] here is really just an opaque string token. Clients
/// may not assume anything about the structure of the nonce.
#[derive(Debug, Clone, Serialize)]
pub struct Nonce(String);

impl AsRef<str> for Nonce {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for Nonce {
    fn from(value: String) -> Self {
        Nonce(value)
    }
}

impl From<&str> for Nonce {
    fn from(value: &str) -> Self {
        Nonce(value.to_string())
    }
}

/// JWS signature algorithm for the protected header.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// ECDSA P-256 with SHA-256, the account key algorithm.
    ES256,
    /// HMAC SHA-256, used only for the external account binding token.
    HS256,
}

/// The signed header values for the JWS which are common to each
/// request.
///
/// RFC 8555 only supports "protected" headers, and only a subset of
/// those fields. Fields which are `None` are left out of the header.
/// Exactly one of `kid` and `jwk` is set: `kid` once the account is
/// registered, the embedded `jwk` for `newAccount` and the EAB inner
/// token.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedHeader {
    #[serde(rename = "alg")]
    algorithm: SignatureAlgorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<Nonce>,
    url: Url,
}

impl ProtectedHeader {
    /// Header for a request signed by a registered account, identified
    /// by its `kid` (the account location URL).
    pub fn account(kid: impl Into<String>, url: Url, nonce: Nonce) -> Self {
        ProtectedHeader {
            algorithm: SignatureAlgorithm::ES256,
            kid: Some(kid.into()),
            jwk: None,
            nonce: Some(nonce),
            url,
        }
    }

    /// Header for a request carrying the embedded public JWK, used when
    /// the server does not yet know the key (`newAccount`).
    pub fn embedded_jwk(key: &KeyPair, url: Url, nonce: Nonce) -> Self {
        ProtectedHeader {
            algorithm: SignatureAlgorithm::ES256,
            kid: None,
            jwk: Some(key.public_jwk()),
            nonce: Some(nonce),
            url,
        }
    }

    /// Header for the HS256 external account binding inner token. EAB
    /// headers carry no nonce.
    pub fn external_account_binding(eab_kid: impl Into<String>, url: Url) -> Self {
        ProtectedHeader {
            algorithm: SignatureAlgorithm::HS256,
            kid: Some(eab_kid.into()),
            jwk: None,
            nonce: None,
            url,
        }
    }

    /// Replace the [`Nonce`] in this header with a new value.
    pub fn replace_nonce(&mut self, nonce: Nonce) {
        self.nonce = Some(nonce);
    }
}

/// JWS payload: the empty string for POST-AS-GET semantics, otherwise
/// base64url-encoded JSON.
#[derive(Debug)]
enum Payload<P> {
    Json(Base64JSON<P>),
    Empty,
}

impl<P> Payload<P>
where
    P: Serialize,
{
    fn serialized_value(&self) -> ::std::result::Result<String, serde_json::Error> {
        match self {
            Payload::Json(data) => data.serialized_value(),
            Payload::Empty => Ok("".to_owned()),
        }
    }
}

impl<P> ser::Serialize for Payload<P>
where
    P: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Payload::Json(data) => data.serialize(serializer),
            Payload::Empty => serializer.serialize_str(""),
        }
    }
}

/// A JWS in the flattened JSON serialization, ready to be posted as
/// `application/jose+json`.
#[derive(Debug, Serialize)]
#[serde(bound(serialize = "P: Serialize"))]
pub struct SignedToken<P> {
    protected: Base64JSON<ProtectedHeader>,
    payload: Payload<P>,
    signature: Base64Data<Vec<u8>>,
}

/// A JWS envelope awaiting its signature.
pub struct UnsignedToken<P> {
    protected: Base64JSON<ProtectedHeader>,
    payload: Payload<P>,
}

impl UnsignedToken<()> {
    /// A POST-AS-GET token with the empty-string payload.
    pub fn get(protected: ProtectedHeader) -> Self {
        UnsignedToken {
            protected: protected.into(),
            payload: Payload::Empty,
        }
    }
}

impl<P> UnsignedToken<P> {
    /// A POST token with a JSON payload.
    pub fn post(protected: ProtectedHeader, payload: P) -> Self {
        UnsignedToken {
            protected: protected.into(),
            payload: payload.into(),
        }
    }
}

impl<P> From<P> for Payload<P> {
    fn from(value: P) -> Self {
        Payload::Json(value.into())
    }
}

impl<P> UnsignedToken<P>
where
    P: Serialize,
{
    fn signing_input(&self) -> Result<String> {
        let header = self.protected.serialized_value()?;
        let payload = self.payload.serialized_value()?;
        Ok(format!("{header}.{payload}"))
    }

    /// Sign the token with the account key (ES256).
    pub fn sign(self, key: &KeyPair) -> Result<SignedToken<P>> {
        let message = self.signing_input()?;
        let signature = key.sign_es256(message.as_bytes())?;
        Ok(SignedToken {
            protected: self.protected,
            payload: self.payload,
            signature: signature.into(),
        })
    }

    /// Sign the token with an HMAC-SHA-256 key supplied as base64url
    /// (HS256, external account binding).
    pub fn sign_hmac(self, key_b64url: &str) -> Result<SignedToken<P>> {
        let key = base64url_decode(key_b64url)?;
        let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key size");
        let message = self.signing_input()?;
        mac.update(message.as_bytes());
        let signature = mac.finalize().into_bytes().to_vec();
        Ok(SignedToken {
            protected: self.protected,
            payload: self.payload,
            signature: signature.into(),
        })
    }
}
