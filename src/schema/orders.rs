//! # Certificate orders.
//!
//! Each order corresponds to a single request for a certificate chain,
//! but may include multiple identifiers. The order is created by the
//! client, and then validated using the authorizations and challenges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::Base64Data;
use crate::protocol::Url;

use super::Identifier;

/// An ACME order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// The status of the order.
    pub status: OrderStatus,

    /// The time at which the order expires, and the provider will no
    /// longer consider it valid.
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,

    /// The identifiers which apply to this order.
    pub identifiers: Vec<Identifier>,

    /// The urls pointing to the authorization objects for this order.
    pub authorizations: Vec<Url>,

    /// The URL used to finalize this order with a CSR.
    pub finalize: Url,

    /// The URL used to fetch this order's certificate chain, present
    /// once the order is valid.
    #[serde(default)]
    pub certificate: Option<Url>,

    /// The problem document describing why the order failed, if it did.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// State of the order during processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order is waiting for authorizations to be completed.
    Pending,
    /// Order is ready for a certificate signing request.
    Ready,
    /// ACME provider is processing the certificate signing request.
    Processing,
    /// ACME provider has issued the certificate.
    Valid,
    /// ACME provider has encountered an error while processing the
    /// order, and the entire order is now considered invalid.
    Invalid,
}

impl OrderStatus {
    /// The order has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

/// A request to create a new order associated with an ACME account.
#[derive(Debug, Serialize, Default)]
pub struct NewOrderRequest {
    /// A list of identifiers to include in the order.
    pub identifiers: Vec<Identifier>,
}

/// The request sent to finalize an order, carrying the certificate
/// signing request as base64url DER.
#[derive(Debug, Serialize)]
pub struct FinalizeOrder {
    csr: Base64Data<Vec<u8>>,
}

impl FinalizeOrder {
    /// Wrap a DER-encoded CSR for the finalize request.
    pub fn new(csr_der: Vec<u8>) -> Self {
        FinalizeOrder {
            csr: csr_der.into(),
        }
    }
}
