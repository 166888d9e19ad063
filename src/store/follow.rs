//! `Follow` rows: a local account's accepted fediverse followers (spec §3, §4.5).

use super::{split_page, Page, Store};
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Follow {
    pub user_did: String,
    pub actor_uri: String,
    pub activity_id: String,
    pub actor_inbox: String,
    pub actor_shared_inbox: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Idempotent on `(user_did, actor_uri)` — a replayed Follow is a no-op (spec §4.1).
    pub async fn create_follow(
        &self,
        user_did: &str,
        actor_uri: &str,
        activity_id: &str,
        actor_inbox: &str,
        actor_shared_inbox: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO follows (user_did, actor_uri, activity_id, actor_inbox, actor_shared_inbox, created_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (user_did, actor_uri) DO NOTHING",
        )
        .bind(user_did)
        .bind(actor_uri)
        .bind(activity_id)
        .bind(actor_inbox)
        .bind(actor_shared_inbox)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_follow(
        &self,
        user_did: &str,
        actor_uri: &str,
    ) -> Result<Option<Follow>, Error> {
        let row = sqlx::query_as::<_, Follow>(
            "SELECT user_did, actor_uri, activity_id, actor_inbox, actor_shared_inbox, created_at
             FROM follows WHERE user_did = $1 AND actor_uri = $2",
        )
        .bind(user_did)
        .bind(actor_uri)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn delete_follow(&self, user_did: &str, actor_uri: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM follows WHERE user_did = $1 AND actor_uri = $2")
            .bind(user_did)
            .bind(actor_uri)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Cascading cleanup for `Delete(actor)` (spec §4.5): removes every follow row originating
    /// from `actor_uri`, across all local accounts.
    pub async fn delete_follows_by_actor(&self, actor_uri: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM follows WHERE actor_uri = $1")
            .bind(actor_uri)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// All followers of `user_did`, for fan-out (§4.4). Not paginated: the dispatcher needs the
    /// full set to compute shared-inbox coalescing.
    pub async fn get_all_followers(&self, user_did: &str) -> Result<Vec<Follow>, Error> {
        let rows = sqlx::query_as::<_, Follow>(
            "SELECT user_did, actor_uri, activity_id, actor_inbox, actor_shared_inbox, created_at
             FROM follows WHERE user_did = $1 ORDER BY created_at DESC",
        )
        .bind(user_did)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Keyset-paginated followers, for the `/followers` AS Collection page.
    pub async fn get_followers_page(
        &self,
        user_did: &str,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Page<Follow>, Error> {
        let rows = sqlx::query_as::<_, Follow>(
            "SELECT user_did, actor_uri, activity_id, actor_inbox, actor_shared_inbox, created_at
             FROM follows
             WHERE user_did = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(user_did)
        .bind(cursor)
        .bind(limit + 1)
        .fetch_all(self.pool())
        .await?;
        Ok(split_page(rows, limit, |f| f.created_at))
    }

    pub async fn count_followers(&self, user_did: &str) -> Result<i64, Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM follows WHERE user_did = $1")
                .bind(user_did)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}
