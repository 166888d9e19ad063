//! `ExternalReply` rows: external replies discovered via the backlink source and relayed as AP
//! (spec §3, §4.9).

use super::Store;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ExternalReply {
    pub at_uri: String,
    pub parent_at_uri: String,
    pub author_did: String,
    pub ap_note_id: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub async fn create_external_reply(
        &self,
        at_uri: &str,
        parent_at_uri: &str,
        author_did: &str,
        ap_note_id: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO external_replies (at_uri, parent_at_uri, author_did, ap_note_id, created_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (at_uri) DO NOTHING",
        )
        .bind(at_uri)
        .bind(parent_at_uri)
        .bind(author_did)
        .bind(ap_note_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn external_reply_exists(&self, at_uri: &str) -> Result<bool, Error> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM external_replies WHERE at_uri = $1")
                .bind(at_uri)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some())
    }
}
