#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod dns;
pub mod encoding;
pub mod errors;
pub mod key;
pub mod protocol;
pub mod schema;
pub mod service;
pub mod store;
pub(crate) mod transport;

pub use errors::{Error, Result};
pub use service::{IssuedCert, Issuer, IssuerConfig};
