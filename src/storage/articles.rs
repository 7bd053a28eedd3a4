use anyhow::Result;
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{Article, ArticleDraft};

// ============================================================================
// Connection-level Operations
// ============================================================================
//
// These take an explicit connection so the reconciler can run every write
// for one feed inside a single transaction. The pool-level methods below
// are conveniences for callers outside that path.

/// Look up an article by its stored URL within one feed.
pub async fn find_article(
    conn: &mut SqliteConnection,
    feed_id: i64,
    url: &str,
) -> Result<Option<Article>> {
    let article = sqlx::query_as::<_, Article>(
        "SELECT * FROM articles WHERE feed_id = ? AND url = ? LIMIT 1",
    )
    .bind(feed_id)
    .bind(url)
    .fetch_optional(conn)
    .await?;

    Ok(article)
}

/// Insert a new article row, returning its id.
pub async fn insert_article(
    conn: &mut SqliteConnection,
    feed_id: i64,
    draft: &ArticleDraft<'_>,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO articles (feed_id, title, url, author, summary, content, pub_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(feed_id)
    .bind(draft.title)
    .bind(draft.url)
    .bind(draft.author)
    .bind(draft.summary)
    .bind(draft.content)
    .bind(draft.pub_date)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Overwrite an existing article's content fields in place.
///
/// The row id, `url`, and `is_read` are untouched, so read-state and any
/// externally held references to the article survive the update.
pub async fn update_article(
    conn: &mut SqliteConnection,
    article_id: i64,
    draft: &ArticleDraft<'_>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        UPDATE articles SET
            title = ?, author = ?, summary = ?, content = ?, pub_date = ?, updated_at = ?
        WHERE id = ?
    "#,
    )
    .bind(draft.title)
    .bind(draft.author)
    .bind(draft.summary)
    .bind(draft.content)
    .bind(draft.pub_date)
    .bind(now)
    .bind(article_id)
    .execute(conn)
    .await?;

    Ok(())
}

// ============================================================================
// Pool-level Operations
// ============================================================================

impl Database {
    /// Look up an article by `(feed, url)` outside a transaction.
    pub async fn find_article_by_url(&self, feed_id: i64, url: &str) -> Result<Option<Article>> {
        let mut conn = self.pool.acquire().await?;
        find_article(&mut conn, feed_id, url).await
    }

    /// All articles for one feed, newest first.
    pub async fn get_articles_for_feed(&self, feed_id: i64) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE feed_id = ?
            ORDER BY pub_date DESC, created_at DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(articles)
    }

    /// Number of articles stored for one feed.
    pub async fn count_articles(&self, feed_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Mark an article as read
    pub async fn mark_read(&self, article_id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE articles SET is_read = 1, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk-delete articles created before the cutoff (unix seconds).
    /// Returns the number of rows removed.
    pub async fn delete_articles_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db_with_feed() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db
            .create_feed("https://example.com/feed.xml", "Example")
            .await
            .unwrap();
        (db, feed_id)
    }

    fn draft<'a>(title: &'a str, url: &'a str) -> ArticleDraft<'a> {
        ArticleDraft {
            title,
            url,
            author: "",
            summary: "summary",
            content: "content",
            pub_date: Some(1_700_000_000),
        }
    }

    async fn insert(db: &Database, feed_id: i64, d: &ArticleDraft<'_>) -> i64 {
        let mut conn = db.pool.acquire().await.unwrap();
        insert_article(&mut conn, feed_id, d).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find_by_url() {
        let (db, feed_id) = test_db_with_feed().await;
        let id = insert(&db, feed_id, &draft("One", "https://example.com/1")).await;

        let found = db
            .find_article_by_url(feed_id, "https://example.com/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.title, "One");
        assert!(!found.is_read);
    }

    #[tokio::test]
    async fn test_find_scoped_to_feed() {
        let (db, feed_a) = test_db_with_feed().await;
        let feed_b = db.create_feed("https://b.example/feed", "B").await.unwrap();
        insert(&db, feed_a, &draft("One", "https://example.com/1")).await;

        assert!(db
            .find_article_by_url(feed_b, "https://example.com/1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_preserves_url_and_read_state() {
        let (db, feed_id) = test_db_with_feed().await;
        let id = insert(&db, feed_id, &draft("One", "https://example.com/1")).await;
        db.mark_read(id).await.unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        update_article(&mut conn, id, &draft("One v2", "ignored"))
            .await
            .unwrap();

        let article = db
            .find_article_by_url(feed_id, "https://example.com/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.id, id);
        assert_eq!(article.title, "One v2");
        assert_eq!(article.url, "https://example.com/1");
        assert!(article.is_read);
    }

    #[tokio::test]
    async fn test_delete_feed_cascades_to_articles() {
        let (db, feed_id) = test_db_with_feed().await;
        insert(&db, feed_id, &draft("One", "https://example.com/1")).await;

        db.delete_feed(feed_id).await.unwrap();
        assert_eq!(db.count_articles(feed_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_older_than_honors_cutoff() {
        let (db, feed_id) = test_db_with_feed().await;
        let old = insert(&db, feed_id, &draft("Old", "https://example.com/old")).await;
        insert(&db, feed_id, &draft("New", "https://example.com/new")).await;

        let now = chrono::Utc::now().timestamp();
        // Backdate one row forty days.
        sqlx::query("UPDATE articles SET created_at = ? WHERE id = ?")
            .bind(now - 40 * 86_400)
            .bind(old)
            .execute(&db.pool)
            .await
            .unwrap();

        let removed = db
            .delete_articles_older_than(now - 30 * 86_400)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.count_articles(feed_id).await.unwrap(), 1);
        assert!(db
            .find_article_by_url(feed_id, "https://example.com/new")
            .await
            .unwrap()
            .is_some());
    }
}
