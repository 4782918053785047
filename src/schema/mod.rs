//! # Schema types for ACME resources.
//!
//! Serde representations of the JSON documents exchanged with an ACME
//! server, per RFC 8555: the directory, accounts, orders, authorizations
//! and challenges.

use serde::{Deserialize, Serialize};

pub mod account;
pub mod authorizations;
pub mod challenges;
pub mod directory;
pub mod orders;

pub use account::{Account, CreateAccount};
pub use authorizations::{Authorization, AuthorizationStatus};
pub use challenges::{Challenge, ChallengeStatus, Dns01Challenge};
pub use directory::Directory;
pub use orders::{FinalizeOrder, NewOrderRequest, Order, OrderStatus};

/// An identifier to be certified, currently always a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Identifier {
    /// A name known to the Domain Name System, such as `www.example.com`.
    Dns {
        /// The domain name.
        value: String,
    },
}

impl Identifier {
    /// Create a DNS identifier. ACME matches identifiers
    /// case-insensitively, so the value is lower-cased here.
    pub fn dns(value: impl Into<String>) -> Self {
        Identifier::Dns {
            value: value.into().to_ascii_lowercase(),
        }
    }

    /// The underlying domain name.
    pub fn value(&self) -> &str {
        match self {
            Identifier::Dns { value } => value,
        }
    }
}
