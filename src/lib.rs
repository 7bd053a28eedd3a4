//! gleaner - an RSS/Atom feed ingestion service.
//!
//! The crate aggregates articles from independently operated feeds:
//! feeds are fetched on a schedule ([`feed::Refresher`]), parsed
//! tolerantly ([`feed::parser`]), and reconciled against storage so
//! repeated fetches update articles in place instead of duplicating
//! them ([`feed::reconcile::reconcile_entry`]). Each feed is processed
//! independently; one broken feed never blocks the rest of a batch.

pub mod config;
pub mod feed;
pub mod fetch;
pub mod storage;
pub mod translate;
