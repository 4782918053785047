//! JSON Web Keys and RFC 7638 thumbprints.

use std::fmt;

use elliptic_curve::sec1::Coordinates;
use serde::ser::{self, SerializeStruct};
use sha2::Digest;

use crate::encoding::base64url_encode;

/// JSON Web Key structure for a public signing key.
///
/// JWK serializes the information required to verify or recover a key
/// in a well-known JSON format. This is used to both initially provide
/// a key for an ACME account, and to sign additional pieces of a payload
/// (i.e. external account bindings).
///
/// JWK implements [`serde::Serialize`] so that it can be used as an
/// element of a JSON-serializable structure, and always serializes its
/// members in the canonical thumbprint order.
#[derive(Clone, PartialEq, Eq)]
pub struct Jwk(InnerJwk);

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Jwk").finish()
    }
}

impl Jwk {
    /// An RFC 7638 thumbprint, which uniquely identifies this JWS
    /// cryptographic key.
    ///
    /// The digest input is the canonical JSON form
    /// `{"crv":…,"kty":…,"x":…,"y":…}` with members in exactly that
    /// order and no whitespace. DNS-01 TXT values are derived from this
    /// string, so the ordering is load-bearing.
    pub fn thumbprint(&self) -> String {
        let thumb = serde_json::to_vec(&self).expect("JWK serializes to valid JSON");

        let mut hasher = sha2::Sha256::new();
        hasher.update(&thumb);
        let digest = hasher.finalize();
        base64url_encode(digest)
    }
}

#[derive(Clone, PartialEq, Eq)]
enum InnerJwk {
    EllipticCurve(elliptic_curve::JwkEcKey),
}

impl ser::Serialize for Jwk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match &self.0 {
            InnerJwk::EllipticCurve(ec_jwk) => {
                let mut state = serializer.serialize_struct("Jwk", 4)?;
                let point = ec_jwk
                    .to_encoded_point::<p256::NistP256>()
                    .map_err(|_| ser::Error::custom("JWK is not a P-256 key"))?;
                let Coordinates::Uncompressed { x, y } = point.coordinates() else {
                    return Err(ser::Error::custom("JWK point is not uncompressed"));
                };
                state.serialize_field("crv", ec_jwk.crv())?;
                state.serialize_field("kty", "EC")?;
                state.serialize_field("x", &base64url_encode(x))?;
                state.serialize_field("y", &base64url_encode(y))?;
                state.end()
            }
        }
    }
}

impl From<elliptic_curve::JwkEcKey> for Jwk {
    fn from(value: elliptic_curve::JwkEcKey) -> Self {
        Jwk(InnerJwk::EllipticCurve(value))
    }
}
