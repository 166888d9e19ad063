//! `BridgeAccount` rows: the two PDS-resident relay identities (spec §3, §4.6).

use super::Store;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;

/// Which relay identity a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRole {
    Mastodon,
    Bluesky,
}

impl BridgeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeRole::Mastodon => "mastodon",
            BridgeRole::Bluesky => "bluesky",
        }
    }
}

impl fmt::Display for BridgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BridgeAccount {
    pub role: String,
    pub did: String,
    pub handle: String,
    pub password: String,
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub async fn get_bridge_account(
        &self,
        role: BridgeRole,
    ) -> Result<Option<BridgeAccount>, Error> {
        let row = sqlx::query_as::<_, BridgeAccount>(
            "SELECT role, did, handle, password, access_token, refresh_token, created_at, updated_at
             FROM bridge_accounts WHERE role = $1",
        )
        .bind(role.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn upsert_bridge_account(
        &self,
        role: BridgeRole,
        did: &str,
        handle: &str,
        password: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO bridge_accounts (role, did, handle, password, access_token, refresh_token, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now(), now())
             ON CONFLICT (role) DO UPDATE SET
                did = excluded.did,
                handle = excluded.handle,
                password = excluded.password,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                updated_at = now()",
        )
        .bind(role.as_str())
        .bind(did)
        .bind(handle)
        .bind(password)
        .bind(access_token)
        .bind(refresh_token)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_bridge_account_tokens(
        &self,
        role: BridgeRole,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE bridge_accounts SET access_token = $2, refresh_token = $3, updated_at = now()
             WHERE role = $1",
        )
        .bind(role.as_str())
        .bind(access_token)
        .bind(refresh_token)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_bridge_account(&self, role: BridgeRole) -> Result<(), Error> {
        sqlx::query("DELETE FROM bridge_accounts WHERE role = $1")
            .bind(role.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
