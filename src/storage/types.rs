use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// Outcome of the most recent fetch cycle, persisted on the feed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    FetchFailed,
    ParseFailed,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::FetchFailed => "fetch_failed",
            FetchStatus::ParseFailed => "parse_failed",
        }
    }
}

/// A subscription source, polled periodically for new entries.
///
/// `last_fetch_at` is stamped on every fetch attempt (success or failure);
/// `last_auto_fetch_at` only on scheduled runs, where it gates the per-feed
/// fetch interval. Timestamps are unix seconds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: String,
    pub category: Option<String>,
    pub is_active: bool,
    pub fetch_interval_minutes: i64,
    pub last_fetch_at: Option<i64>,
    pub last_auto_fetch_at: Option<i64>,
    pub last_fetch_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted article, owned by exactly one feed.
///
/// `url` holds the entry's actual link, which is what users open. The
/// reconciler also matches entry guids against this column, so it doubles
/// as the identity key (see `feed::reconcile`).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub summary: String,
    pub content: String,
    pub pub_date: Option<i64>,
    pub is_read: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Field set written when creating or updating an article row.
///
/// `url` is only consulted on insert; updates never move an article to a
/// different link, so externally held references stay valid.
#[derive(Debug, Clone, Copy)]
pub struct ArticleDraft<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub author: &'a str,
    pub summary: &'a str,
    pub content: &'a str,
    pub pub_date: Option<i64>,
}
