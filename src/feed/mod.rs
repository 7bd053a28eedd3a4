//! The feed ingestion pipeline.
//!
//! Three stages, each independently testable:
//!
//! - [`parser`] - tolerant RSS/Atom/RDF parsing into normalized entries
//! - [`reconcile`] - per-entry new/updated/unchanged decisions against storage
//! - [`refresh`] - orchestration across feeds with fault isolation
//!
//! The HTTP side lives in [`crate::fetch`]; everything here is CPU-bound.

pub mod parser;
pub mod reconcile;
pub mod refresh;

pub use parser::{detect_feed_kind, parse, FeedKind, ParsedEntry, ParsedFeed};
pub use reconcile::Reconciliation;
pub use refresh::{
    FeedNotFound, FeedRefresh, RefreshKind, RefreshOptions, RefreshStatus, Refresher,
};
