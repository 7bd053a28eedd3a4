//! Entry reconciliation.
//!
//! Decides, for one incoming entry, whether an article already exists and
//! whether its content moved. The lookup key is the entry's guid (stable
//! across fetches); the stored `url` is the entry's actual link (what users
//! open). The two converge when a feed uses permalinks as guids, which is
//! what makes guid-based lookups against the url column work. An existing
//! row is always updated in place so read-state and externally held
//! references to the article survive.

use anyhow::Result;
use sqlx::SqliteConnection;

use crate::storage::{self, ArticleDraft, Database};

use super::parser::{ParsedEntry, UNTITLED};

/// Outcome of reconciling one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// No article matched either identity key; one was created.
    Created(i64),
    /// An article matched and at least one content field differed.
    Updated(i64),
    /// An article matched with identical content; nothing was written.
    Unchanged(i64),
}

impl Reconciliation {
    pub fn article_id(self) -> i64 {
        match self {
            Reconciliation::Created(id)
            | Reconciliation::Updated(id)
            | Reconciliation::Unchanged(id) => id,
        }
    }

    /// True when the entry was new or its content moved.
    pub fn changed(self) -> bool {
        !matches!(self, Reconciliation::Unchanged(_))
    }
}

/// Reconcile a single entry against storage, on a caller-supplied
/// connection so a whole feed's entries can share one transaction.
pub async fn reconcile_entry(
    conn: &mut SqliteConnection,
    feed_id: i64,
    entry: &ParsedEntry,
) -> Result<Reconciliation> {
    let title = if entry.title.trim().is_empty() {
        UNTITLED
    } else {
        entry.title.as_str()
    };

    // Identity resolution: guid first, then the link when they differ.
    let mut existing = storage::find_article(conn, feed_id, &entry.guid).await?;
    if existing.is_none() && entry.guid != entry.link {
        existing = storage::find_article(conn, feed_id, &entry.link).await?;
    }

    match existing {
        Some(article) => {
            if article.title == title
                && article.summary == entry.summary
                && article.content == entry.content
            {
                return Ok(Reconciliation::Unchanged(article.id));
            }

            storage::update_article(
                conn,
                article.id,
                &ArticleDraft {
                    title,
                    url: &article.url,
                    author: &entry.author,
                    summary: &entry.summary,
                    content: &entry.content,
                    pub_date: entry.published_at,
                },
            )
            .await?;
            tracing::info!(article_id = article.id, title = title, "updated article");
            Ok(Reconciliation::Updated(article.id))
        }
        None => {
            // The stored url is the entry's actual link, not the lookup
            // key, so the user-facing link stays correct.
            let id = storage::insert_article(
                conn,
                feed_id,
                &ArticleDraft {
                    title,
                    url: &entry.link,
                    author: &entry.author,
                    summary: &entry.summary,
                    content: &entry.content,
                    pub_date: entry.published_at,
                },
            )
            .await?;
            tracing::info!(article_id = id, title = title, "created article");
            Ok(Reconciliation::Created(id))
        }
    }
}

/// Pool-level convenience for reconciling a single entry.
pub async fn reconcile(
    db: &Database,
    feed_id: i64,
    entry: &ParsedEntry,
) -> Result<Reconciliation> {
    let mut conn = db.acquire().await?;
    reconcile_entry(&mut conn, feed_id, entry).await
}
