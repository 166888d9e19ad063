//! `PostMapping` rows: local posts the bridge created in response to a remote AP Note
//! (spec §3, §4.5's `Create(Note)` handler).

use super::Store;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct PostMapping {
    pub at_uri: String,
    pub ap_note_id: String,
    pub ap_actor_id: String,
    pub ap_actor_inbox: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Invariant (spec §8.5): both `at_uri` and `ap_note_id` are unique across the table.
    pub async fn create_post_mapping(
        &self,
        at_uri: &str,
        ap_note_id: &str,
        ap_actor_id: &str,
        ap_actor_inbox: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO post_mappings (at_uri, ap_note_id, ap_actor_id, ap_actor_inbox, created_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (at_uri) DO NOTHING",
        )
        .bind(at_uri)
        .bind(ap_note_id)
        .bind(ap_actor_id)
        .bind(ap_actor_inbox)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_post_mapping_by_at_uri(
        &self,
        at_uri: &str,
    ) -> Result<Option<PostMapping>, Error> {
        let row = sqlx::query_as::<_, PostMapping>(
            "SELECT at_uri, ap_note_id, ap_actor_id, ap_actor_inbox, created_at
             FROM post_mappings WHERE at_uri = $1",
        )
        .bind(at_uri)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn get_post_mapping_by_note_id(
        &self,
        ap_note_id: &str,
    ) -> Result<Option<PostMapping>, Error> {
        let row = sqlx::query_as::<_, PostMapping>(
            "SELECT at_uri, ap_note_id, ap_actor_id, ap_actor_inbox, created_at
             FROM post_mappings WHERE ap_note_id = $1",
        )
        .bind(ap_note_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn delete_post_mapping(&self, at_uri: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM post_mappings WHERE at_uri = $1")
            .bind(at_uri)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Cascading cleanup for `Delete(actor)` (spec §4.5).
    pub async fn delete_post_mappings_by_actor(&self, ap_actor_id: &str) -> Result<Vec<String>, Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("DELETE FROM post_mappings WHERE ap_actor_id = $1 RETURNING at_uri")
                .bind(ap_actor_id)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(uri,)| uri).collect())
    }
}
