//! # Authorization of identifiers.
//!
//! Authorizations prove that the ACME account controls the identifier in
//! question, by asking the account to fulfil one of the attached
//! challenges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::challenges::{Challenge, Dns01Challenge};
use super::Identifier;

/// An ACME authorization, fetched from one of an order's authorization
/// URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// The identifier this authorization covers. For a wildcard order
    /// the value is the apex name and `wildcard` is set.
    pub identifier: Identifier,

    /// The status of this authorization.
    pub status: AuthorizationStatus,

    /// When this authorization expires.
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,

    /// The challenges offered to validate this authorization. Only one
    /// needs to be fulfilled.
    pub challenges: Vec<Challenge>,

    /// Present and true when this authorization belongs to a wildcard
    /// identifier.
    #[serde(default)]
    pub wildcard: Option<bool>,
}

impl Authorization {
    /// Select the dns-01 challenge, if the server offered one.
    pub fn dns01_challenge(&self) -> Option<&Dns01Challenge> {
        self.challenges.iter().find_map(Challenge::dns01)
    }
}

/// State of an ACME authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    /// Waiting for a challenge to be fulfilled.
    Pending,
    /// A challenge was validated successfully.
    Valid,
    /// Challenge validation failed.
    Invalid,
    /// The client deactivated this authorization.
    Deactivated,
    /// The authorization expired before validation.
    Expired,
    /// The server revoked this authorization.
    Revoked,
}

impl AuthorizationStatus {
    /// The authorization has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        !matches!(self, AuthorizationStatus::Pending)
    }

    /// The authorization was validated successfully.
    pub fn is_valid(&self) -> bool {
        matches!(self, AuthorizationStatus::Valid)
    }
}
