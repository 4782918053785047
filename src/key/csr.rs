//! PKCS#10 certificate signing requests for order finalization.

use std::str::FromStr;

use der::asn1::{Any, BitString, SetOfVec};
use der::{Decode, Encode, Tag};
use pkcs8::EncodePublicKey;
use signature::Signer;
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{KeyUsage, KeyUsages, SubjectAltName};
use x509_cert::ext::AsExtension;
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo, Version};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::errors::{Error, Result};

use super::KeyPair;

/// The informational data in a certificate signing request sufficient to
/// fulfill an ACME certificate signing order's finalize step.
///
/// ACME CSRs carry the subject names and the certificate public key and
/// nothing else; the CA only attests that the requester controlled the
/// named identifiers. The first name becomes the subject common name and
/// every name is listed in the SubjectAltName extension.
#[derive(Debug, Default)]
pub struct CertificateSigningRequest {
    names: Vec<String>,
}

impl CertificateSigningRequest {
    /// Create a new, empty certificate signing request.
    pub fn new() -> Self {
        CertificateSigningRequest { names: Vec::new() }
    }

    /// Add a DNS subject name to this certificate signing request.
    pub fn push<N: Into<String>>(&mut self, name: N) {
        self.names.push(name.into());
    }

    /// Number of names in this CSR.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// CSR contains no names.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Sign this request with the certificate key, producing ASN.1 DER.
    ///
    /// The key here must not be the account key used in the rest of the
    /// ACME protocol.
    pub fn sign(&self, key: &KeyPair) -> Result<Vec<u8>> {
        let common_name = self
            .names
            .first()
            .ok_or_else(|| Error::Config("CSR requires at least one subject name".into()))?;
        let subject = Name::from_str(&format!("CN={common_name}"))?;

        let public_key_der = key.secret().public_key().to_public_key_der()?;
        let public_key = SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes())?;

        // SAN carries every identifier; KeyUsage marks the key as a TLS
        // signing key and is critical.
        let san_names = self
            .names
            .iter()
            .map(|name| {
                der::asn1::Ia5String::new(name)
                    .map(GeneralName::DnsName)
                    .map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;
        let san = SubjectAltName(san_names);
        let key_usage = KeyUsage(KeyUsages::DigitalSignature.into());

        let san_extension = san.to_extension(&subject, &[])?;
        let key_usage_extension = key_usage.to_extension(&subject, &[])?;

        // The extensionRequest attribute value is `Extensions`, a
        // SEQUENCE OF Extension, assembled here from the individual
        // encoded extensions.
        let mut extensions_der = san_extension.to_der()?;
        extensions_der.extend(key_usage_extension.to_der()?);
        let attribute_value = Any::new(Tag::Sequence, extensions_der)?;

        let mut values = SetOfVec::new();
        values.insert(attribute_value)?;
        let attribute = Attribute {
            oid: const_oid::db::rfc5912::ID_EXTENSION_REQ,
            values,
        };
        let mut attributes = SetOfVec::new();
        attributes.insert(attribute)?;

        let info = CertReqInfo {
            version: Version::V1,
            subject,
            public_key,
            attributes,
        };

        let message = info.to_der()?;
        let signer = p256::ecdsa::SigningKey::from(key.secret());
        let signature: ::ecdsa::der::Signature<p256::NistP256> = signer.try_sign(&message)?;

        let request = CertReq {
            info,
            algorithm: AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            signature: BitString::from_bytes(signature.as_bytes())?,
        };

        Ok(request.to_der()?)
    }
}
