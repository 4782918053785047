//! # ACME JWS envelope and the signed-request client.
//!
//! Most ACME requests are authenticated as a JWS signed by the account
//! key. This module implements that envelope, the anti-replay nonce
//! bookkeeping, and an [`AcmeClient`] which carries the right nonce
//! through a series of requests against one directory.

use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod client;
pub mod jose;

pub use client::AcmeClient;

/// Universal Resource Locator which provides a [`std::fmt::Debug`]
/// implementation printing the full URL (rather than the parsed parts)
/// for compactness.
///
/// This tries to be a drop-in replacement for [`reqwest::Url`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Url(reqwest::Url);

impl Url {
    /// Underlying string representation of the URL.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Just the path component of the URL.
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Just the host component of the URL.
    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }
}

impl Deref for Url {
    type Target = reqwest::Url;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<reqwest::Url> for Url {
    fn from(value: reqwest::Url) -> Self {
        Url(value)
    }
}

impl From<Url> for reqwest::Url {
    fn from(value: Url) -> Self {
        value.0
    }
}

impl AsRef<str> for Url {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Url").field(&self.0.as_str()).finish()
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for Url {
    type Err = <reqwest::Url as FromStr>::Err;

    fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
        s.parse().map(Url)
    }
}
