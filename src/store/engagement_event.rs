//! `EngagementEvent` rows: Likes/Shares on local posts, batched by [`crate::engagement_notifier`]
//! (spec §3, §4.8).

use super::Store;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementKind {
    Like,
    Share,
}

impl EngagementKind {
    fn as_str(self) -> &'static str {
        match self {
            EngagementKind::Like => "like",
            EngagementKind::Share => "share",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EngagementEvent {
    pub activity_id: String,
    pub kind: String,
    pub post_at_uri: String,
    pub post_author_did: String,
    pub ap_actor_id: String,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl Store {
    pub async fn create_engagement_event(
        &self,
        activity_id: &str,
        kind: EngagementKind,
        post_at_uri: &str,
        post_author_did: &str,
        ap_actor_id: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO engagement_events (activity_id, kind, post_at_uri, post_author_did, ap_actor_id, created_at, notified_at)
             VALUES ($1, $2, $3, $4, $5, now(), NULL)
             ON CONFLICT (activity_id) DO NOTHING",
        )
        .bind(activity_id)
        .bind(kind.as_str())
        .bind(post_at_uri)
        .bind(post_author_did)
        .bind(ap_actor_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_engagement_event(&self, activity_id: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM engagement_events WHERE activity_id = $1")
            .bind(activity_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Cascading cleanup for `Delete(actor)` (spec §4.5).
    pub async fn delete_engagement_events_by_actor(&self, ap_actor_id: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM engagement_events WHERE ap_actor_id = $1")
            .bind(ap_actor_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Rows with `notified_at IS NULL AND created_at <= older_than`, ascending by `created_at`
    /// (spec §4.1).
    pub async fn get_unnotified(
        &self,
        kind: EngagementKind,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EngagementEvent>, Error> {
        let rows = sqlx::query_as::<_, EngagementEvent>(
            "SELECT activity_id, kind, post_at_uri, post_author_did, ap_actor_id, created_at, notified_at
             FROM engagement_events
             WHERE kind = $1 AND notified_at IS NULL AND created_at <= $2
             ORDER BY created_at ASC
             LIMIT $3",
        )
        .bind(kind.as_str())
        .bind(older_than)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Atomically sets `notified_at = now()` for every id in `ids`. `notified_at` only ever moves
    /// forward (spec §8 invariant 6): rows already notified are left untouched by the `IS NULL`
    /// guard.
    pub async fn mark_notified(&self, ids: &[String]) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE engagement_events SET notified_at = now()
             WHERE activity_id = ANY($1) AND notified_at IS NULL",
        )
        .bind(ids)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
