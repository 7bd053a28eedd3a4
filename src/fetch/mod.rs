//! HTTP retrieval of feed documents.
//!
//! [`client`] performs the network exchange (timeouts, size limits,
//! normalized errors); [`proxy`] optionally rewrites outbound URLs through
//! a forward relay before the request is sent.

mod client;
mod proxy;

pub use client::{FetchClient, FetchError, FetchedDocument};
pub use proxy::ProxyResolver;
