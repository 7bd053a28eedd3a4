use anyhow::Result;

use super::schema::Database;
use super::types::{Feed, FetchStatus};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a subscription. The URL must be unique; subscribing twice to
    /// the same URL is an error surfaced to the caller.
    pub async fn create_feed(&self, url: &str, title: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (title, url, created_at, updated_at)
            VALUES (?, ?, ?, ?)
        "#,
        )
        .bind(title)
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Load a single feed by id.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(feed)
    }

    /// All feeds with `is_active` set, in creation order.
    pub async fn list_active_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT * FROM feeds WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// Record the outcome of a fetch cycle on the feed row.
    ///
    /// `last_fetch_at` is stamped on every call; `last_auto_fetch_at` only
    /// when `scheduled` is set, so manual refreshes never push back a feed's
    /// polling interval.
    pub async fn update_feed_status(
        &self,
        feed_id: i64,
        status: FetchStatus,
        scheduled: bool,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let auto_stamp = scheduled.then_some(now);
        sqlx::query(
            r#"
            UPDATE feeds SET
                last_fetch_status = ?,
                last_fetch_at = ?,
                last_auto_fetch_at = COALESCE(?, last_auto_fetch_at),
                updated_at = ?
            WHERE id = ?
        "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(auto_stamp)
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adopt feed-level metadata from a parsed document, but only into
    /// columns that are still empty. Admin-curated titles and descriptions
    /// are never overwritten.
    pub async fn merge_feed_metadata(
        &self,
        feed_id: i64,
        title: &str,
        description: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE feeds SET
                title = CASE WHEN title = '' AND ? <> '' THEN ? ELSE title END,
                description = CASE WHEN description = '' AND ? <> '' THEN ? ELSE description END,
                updated_at = ?
            WHERE id = ?
        "#,
        )
        .bind(title)
        .bind(title)
        .bind(description)
        .bind(description)
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Unsubscribe. Articles cascade via the foreign key.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
