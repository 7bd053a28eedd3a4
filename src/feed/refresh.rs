//! Fetch orchestration.
//!
//! Drives the fetch → parse → reconcile sequence for one feed or for every
//! active feed. Feeds are processed independently: any failure is recorded
//! on that feed's status row and never aborts the rest of a batch. The
//! all-feeds path fans out with bounded concurrency; an in-process
//! in-flight set guarantees at most one running refresh per feed.

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::fetch::FetchClient;
use crate::storage::{Database, Feed, FetchStatus};

use super::parser;
use super::reconcile::{reconcile_entry, Reconciliation};

/// The single-feed path was asked for a feed that does not exist.
#[derive(Debug, Error)]
#[error("Feed {0} not found")]
pub struct FeedNotFound(pub i64);

/// Whether a refresh was triggered by the scheduler or by hand.
///
/// Scheduled runs stamp `last_auto_fetch_at` and honor each feed's fetch
/// interval; manual runs do neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Manual,
    Scheduled,
}

/// Tuning for a refresher instance.
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Client-side bound on each feed's whole HTTP exchange
    pub timeout: Duration,
    /// Maximum feeds fetched concurrently in the all-feeds path
    pub max_concurrency: usize,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_concurrency: 8,
        }
    }
}

/// Terminal state of one feed's refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    Success,
    /// Transport-level failure (timeout, connect, non-2xx)
    FetchFailed(String),
    /// The body yielded no parseable structure
    ParseFailed,
    /// Scheduled run: the feed's fetch interval has not elapsed
    NotDue,
    /// Another refresh of this feed is already running in this process
    InFlight,
    /// Infrastructure error (storage), logged and isolated
    Error(String),
}

impl RefreshStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshStatus::Success)
    }
}

impl std::fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshStatus::Success => write!(f, "success"),
            RefreshStatus::FetchFailed(msg) => write!(f, "fetch failed: {}", msg),
            RefreshStatus::ParseFailed => write!(f, "parse failed"),
            RefreshStatus::NotDue => write!(f, "not due"),
            RefreshStatus::InFlight => write!(f, "already in flight"),
            RefreshStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Per-feed outcome returned for observability.
#[derive(Debug, Clone)]
pub struct FeedRefresh {
    pub feed_id: i64,
    pub status: RefreshStatus,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub total_articles: i64,
}

impl FeedRefresh {
    fn empty(feed_id: i64, status: RefreshStatus) -> Self {
        Self {
            feed_id,
            status,
            created: 0,
            updated: 0,
            unchanged: 0,
            total_articles: 0,
        }
    }
}

/// Orchestrates fetch/parse/reconcile cycles over the stored feeds.
///
/// Owns the HTTP client (one connection pool for the whole run) and the
/// in-flight set that serializes refreshes per feed within this process.
/// Cross-process exclusion stays the scheduler's contract.
#[derive(Clone)]
pub struct Refresher {
    db: Database,
    client: FetchClient,
    options: RefreshOptions,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Refresher {
    pub fn new(db: Database, client: FetchClient, options: RefreshOptions) -> Self {
        Self {
            db,
            client,
            options,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Refresh a single feed.
    ///
    /// Fetch and parse failures are recovered into the returned status and
    /// the feed's `last_fetch_status`; they are not errors.
    ///
    /// # Errors
    ///
    /// [`FeedNotFound`] when the id does not exist; storage errors
    /// otherwise.
    pub async fn refresh_feed(&self, feed_id: i64, kind: RefreshKind) -> Result<FeedRefresh> {
        let Some(_guard) = self.try_begin(feed_id) else {
            tracing::debug!(feed_id = feed_id, "refresh already in flight, skipping");
            return Ok(FeedRefresh::empty(feed_id, RefreshStatus::InFlight));
        };

        self.refresh_feed_inner(feed_id, kind).await
    }

    async fn refresh_feed_inner(&self, feed_id: i64, kind: RefreshKind) -> Result<FeedRefresh> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or(FeedNotFound(feed_id))?;

        if kind == RefreshKind::Scheduled && !is_due(&feed, Utc::now().timestamp()) {
            tracing::debug!(feed_id = feed_id, "feed not due, skipping");
            return Ok(FeedRefresh::empty(feed_id, RefreshStatus::NotDue));
        }

        tracing::info!(feed_id = feed_id, url = %feed.url, "refreshing feed");

        let document = match self.client.fetch(&feed.url, self.options.timeout).await {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(feed_id = feed_id, url = %feed.url, error = %err, "feed fetch failed");
                self.db
                    .update_feed_status(feed_id, FetchStatus::FetchFailed, false)
                    .await?;
                return Ok(FeedRefresh::empty(
                    feed_id,
                    RefreshStatus::FetchFailed(err.to_string()),
                ));
            }
        };

        let Some(parsed) = parser::parse(&document.body, &document.encoding) else {
            tracing::warn!(feed_id = feed_id, url = %feed.url, "feed body could not be parsed");
            self.db
                .update_feed_status(feed_id, FetchStatus::ParseFailed, false)
                .await?;
            return Ok(FeedRefresh::empty(feed_id, RefreshStatus::ParseFailed));
        };

        self.db
            .merge_feed_metadata(feed_id, &parsed.title, &parsed.description)
            .await?;
        self.db
            .update_feed_status(feed_id, FetchStatus::Success, kind == RefreshKind::Scheduled)
            .await?;

        // All of one feed's article writes commit together; a crash
        // mid-cycle never leaves the feed half-reconciled.
        let mut created = 0;
        let mut updated = 0;
        let mut unchanged = 0;
        let mut tx = self.db.begin().await?;
        for entry in &parsed.entries {
            match reconcile_entry(&mut tx, feed_id, entry).await? {
                Reconciliation::Created(_) => created += 1,
                Reconciliation::Updated(_) => updated += 1,
                Reconciliation::Unchanged(_) => unchanged += 1,
            }
        }
        tx.commit().await?;

        let total_articles = self.db.count_articles(feed_id).await?;
        tracing::info!(
            feed_id = feed_id,
            created = created,
            updated = updated,
            total = total_articles,
            "feed refresh complete"
        );

        Ok(FeedRefresh {
            feed_id,
            status: RefreshStatus::Success,
            created,
            updated,
            unchanged,
            total_articles,
        })
    }

    /// Refresh every active feed with bounded concurrency.
    ///
    /// One outcome per active feed, in completion order. A feed that fails
    /// at any stage is recorded and never blocks its siblings.
    pub async fn refresh_all_active(&self, kind: RefreshKind) -> Vec<FeedRefresh> {
        let feeds = match self.db.list_active_feeds().await {
            Ok(feeds) => feeds,
            Err(err) => {
                tracing::error!(error = %err, "could not list active feeds");
                return Vec::new();
            }
        };
        if feeds.is_empty() {
            return Vec::new();
        }

        tracing::info!(count = feeds.len(), "refreshing active feeds");

        stream::iter(feeds)
            .map(|feed| {
                let feed_id = feed.id;
                async move {
                    match self.refresh_feed(feed_id, kind).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::error!(feed_id = feed_id, error = %err, "feed refresh aborted");
                            FeedRefresh::empty(feed_id, RefreshStatus::Error(err.to_string()))
                        }
                    }
                }
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await
    }

    /// Delete articles created more than `days` days ago. Returns the
    /// number of rows removed.
    pub async fn prune_articles_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - days * 86_400;
        let removed = self.db.delete_articles_older_than(cutoff).await?;
        tracing::info!(days = days, removed = removed, "pruned old articles");
        Ok(removed)
    }

    fn try_begin(&self, feed_id: i64) -> Option<InFlightGuard<'_>> {
        let mut set = lock_ignoring_poison(&self.in_flight);
        if !set.insert(feed_id) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            feed_id,
        })
    }
}

/// True when a scheduled run should fetch this feed.
fn is_due(feed: &Feed, now: i64) -> bool {
    match feed.last_auto_fetch_at {
        Some(last) => now - last >= feed.fetch_interval_minutes * 60,
        None => true,
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the feed from the in-flight set when the refresh ends, on every
/// path out including panics.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<i64>>,
    feed_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_ignoring_poison(self.set).remove(&self.feed_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ProxyResolver;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Wire Feed</title>
  <description>From the mock server</description>
  <item><title>One</title><link>https://example.com/1</link><guid>https://example.com/1</guid></item>
  <item><title>Two</title><link>https://example.com/2</link><guid>https://example.com/2</guid></item>
</channel></rss>"#;

    fn test_feed(last_auto_fetch_at: Option<i64>, interval_minutes: i64) -> Feed {
        Feed {
            id: 1,
            title: "T".to_string(),
            url: "https://example.com/feed".to_string(),
            description: String::new(),
            category: None,
            is_active: true,
            fetch_interval_minutes: interval_minutes,
            last_fetch_at: None,
            last_auto_fetch_at,
            last_fetch_status: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_is_due() {
        let now = 10_000;
        // Never auto-fetched
        assert!(is_due(&test_feed(None, 60), now));
        // Fetched just now
        assert!(!is_due(&test_feed(Some(now - 10), 60), now));
        // Interval elapsed
        assert!(is_due(&test_feed(Some(now - 3600), 60), now));
        // Zero interval is always due
        assert!(is_due(&test_feed(Some(now), 0), now));
    }

    fn refresher_for(db: &Database) -> Refresher {
        Refresher::new(
            db.clone(),
            FetchClient::new(ProxyResolver::disabled()).unwrap(),
            RefreshOptions {
                timeout: Duration::from_secs(5),
                max_concurrency: 4,
            },
        )
    }

    async fn db_with_feed(url: &str) -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db.create_feed(url, "").await.unwrap();
        (db, feed_id)
    }

    #[tokio::test]
    async fn test_refresh_missing_feed_is_not_found() {
        let db = Database::open(":memory:").await.unwrap();
        let refresher = refresher_for(&db);

        let err = refresher
            .refresh_feed(99, RefreshKind::Manual)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<FeedNotFound>().is_some());
    }

    #[tokio::test]
    async fn test_refresh_success_creates_articles_and_merges_metadata() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let (db, feed_id) = db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let refresher = refresher_for(&db);

        let outcome = refresher
            .refresh_feed(feed_id, RefreshKind::Manual)
            .await
            .unwrap();
        assert!(outcome.status.is_success());
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.total_articles, 2);

        let feed = db.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetch_status, "success");
        assert!(feed.last_fetch_at.is_some());
        // Manual refresh never stamps the auto-fetch clock.
        assert!(feed.last_auto_fetch_at.is_none());
        // Stored title was empty, so the parsed one was adopted.
        assert_eq!(feed.title, "Wire Feed");
        assert_eq!(feed.description, "From the mock server");
    }

    #[tokio::test]
    async fn test_refresh_fetch_failure_records_status_and_keeps_articles() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let (db, feed_id) = db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let refresher = refresher_for(&db);

        let first = refresher
            .refresh_feed(feed_id, RefreshKind::Manual)
            .await
            .unwrap();
        assert_eq!(first.created, 2);

        let second = refresher
            .refresh_feed(feed_id, RefreshKind::Manual)
            .await
            .unwrap();
        assert!(matches!(second.status, RefreshStatus::FetchFailed(_)));

        let feed = db.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetch_status, "fetch_failed");
        // Articles from the earlier successful fetch are untouched.
        assert_eq!(db.count_articles(feed_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refresh_unparseable_body_records_parse_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not xml at all"))
            .mount(&mock_server)
            .await;

        let (db, feed_id) = db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let refresher = refresher_for(&db);

        let outcome = refresher
            .refresh_feed(feed_id, RefreshKind::Manual)
            .await
            .unwrap();
        assert_eq!(outcome.status, RefreshStatus::ParseFailed);

        let feed = db.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetch_status, "parse_failed");
        assert!(feed.last_fetch_at.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_refresh_skips_feed_not_yet_due() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let (db, feed_id) = db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let refresher = refresher_for(&db);

        let first = refresher
            .refresh_feed(feed_id, RefreshKind::Scheduled)
            .await
            .unwrap();
        assert!(first.status.is_success());

        let second = refresher
            .refresh_feed(feed_id, RefreshKind::Scheduled)
            .await
            .unwrap();
        assert_eq!(second.status, RefreshStatus::NotDue);

        // A manual refresh ignores the interval.
        let manual = refresher
            .refresh_feed(feed_id, RefreshKind::Manual)
            .await
            .unwrap();
        assert!(manual.status.is_success());
    }

    #[tokio::test]
    async fn test_in_flight_feed_is_skipped() {
        let (db, feed_id) = db_with_feed("https://example.com/feed").await;
        let refresher = refresher_for(&db);

        let _guard = refresher.try_begin(feed_id).unwrap();
        let outcome = refresher
            .refresh_feed(feed_id, RefreshKind::Manual)
            .await
            .unwrap();
        assert_eq!(outcome.status, RefreshStatus::InFlight);

        // The feed row was never touched.
        let feed = db.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.last_fetch_status, "");
    }

    #[tokio::test]
    async fn test_in_flight_guard_releases_on_drop() {
        let (db, feed_id) = db_with_feed("https://example.com/feed").await;
        let refresher = refresher_for(&db);

        {
            let _guard = refresher.try_begin(feed_id).unwrap();
            assert!(refresher.try_begin(feed_id).is_none());
        }
        assert!(refresher.try_begin(feed_id).is_some());
    }
}
