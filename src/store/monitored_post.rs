//! `MonitoredPost` rows: local posts polled for external (non-AP) backlinks (spec §3, §4.9).

use super::Store;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct MonitoredPost {
    pub at_uri: String,
    pub author_did: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub async fn create_monitored_post(&self, at_uri: &str, author_did: &str) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO monitored_posts (at_uri, author_did, last_checked, created_at)
             VALUES ($1, $2, NULL, now())
             ON CONFLICT (at_uri) DO NOTHING",
        )
        .bind(at_uri)
        .bind(author_did)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Oldest-`last_checked`-first, matching the poll order in spec §4.9 (rows never checked
    /// sort first via `NULLS FIRST`).
    pub async fn list_monitored_posts_for_polling(&self, limit: i64) -> Result<Vec<MonitoredPost>, Error> {
        let rows = sqlx::query_as::<_, MonitoredPost>(
            "SELECT at_uri, author_did, last_checked, created_at
             FROM monitored_posts
             ORDER BY last_checked ASC NULLS FIRST
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn mark_monitored_post_checked(&self, at_uri: &str) -> Result<(), Error> {
        sqlx::query("UPDATE monitored_posts SET last_checked = now() WHERE at_uri = $1")
            .bind(at_uri)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_monitored_post(&self, at_uri: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM monitored_posts WHERE at_uri = $1")
            .bind(at_uri)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
