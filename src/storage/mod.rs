mod articles;
mod feeds;
mod schema;
mod types;

pub use articles::{find_article, insert_article, update_article};
pub use schema::Database;
pub use types::{Article, ArticleDraft, DatabaseError, Feed, FetchStatus};
