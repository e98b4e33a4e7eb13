use tavern_types::NewsEntry;

use crate::error::SyncError;
use crate::{Backend, best_effort, with_backend};

/// Append-only feed of notable world events.
#[derive(Clone)]
pub struct NewsFeed {
    backend: Backend,
}

impl NewsFeed {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Returns the new entry's id, or `None` if storage was unavailable.
    pub async fn add_news(
        &self,
        message: &str,
        category: &str,
        author: &str,
    ) -> Result<Option<i64>, SyncError> {
        let (message, category, author) =
            (message.to_string(), category.to_string(), author.to_string());
        let result =
            with_backend(&self.backend, move |b| b.insert_news(&message, &category, &author)).await;
        best_effort("add news", result)
    }

    /// Up to `limit` entries, newest first.
    pub async fn list_news(&self, limit: usize) -> Result<Vec<NewsEntry>, SyncError> {
        let result = with_backend(&self.backend, move |b| b.recent_news(limit)).await;
        Ok(best_effort("list news", result)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tavern_db::MemoryBackend;

    use super::*;

    #[tokio::test]
    async fn newest_entries_come_first() {
        let feed = NewsFeed::new(Arc::new(MemoryBackend::new()));
        for i in 1..=5 {
            feed.add_news(&format!("event {i}"), "world", "herald").await.unwrap();
        }

        let latest = feed.list_news(3).await.unwrap();
        let messages: Vec<&str> = latest.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["event 5", "event 4", "event 3"]);
        assert!(latest[0].id > latest[1].id);
    }

    #[tokio::test]
    async fn empty_feed_lists_nothing() {
        let feed = NewsFeed::new(Arc::new(MemoryBackend::new()));
        assert!(feed.list_news(15).await.unwrap().is_empty());
    }
}
