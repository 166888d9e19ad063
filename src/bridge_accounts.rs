//! Lifecycle of the two PDS-resident relay accounts (spec §4.6).

use crate::{
    error::Error,
    pds_client::PdsClient,
    store::bridge_account::{BridgeAccount, BridgeRole},
    store::Store,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Settings an account is (re)created from, independent of [`crate::config::AppSettings`]'s
/// wire shape so this module can be exercised in tests without a full settings struct.
pub struct BridgeAccountProfile {
    pub handle: String,
    pub display_name: String,
    pub description: String,
    pub avatar_url: Option<String>,
}

/// Manages one of the two relay identities, serializing token refresh (spec §5).
pub struct BridgeAccountManager {
    role: BridgeRole,
    store: Store,
    pds: PdsClient,
    admin_token: String,
    refresh_lock: Mutex<()>,
}

impl BridgeAccountManager {
    pub fn new(role: BridgeRole, store: Store, pds: PdsClient, admin_token: String) -> Self {
        BridgeAccountManager {
            role,
            store,
            pds,
            admin_token,
            refresh_lock: Mutex::new(()),
        }
    }

    /// On startup: refresh an existing row's token; on failure, try password login; on failure,
    /// delete and recreate the account (spec §4.6).
    pub async fn ensure_ready(&self, profile: &BridgeAccountProfile) -> Result<BridgeAccount, Error> {
        if let Some(account) = self.store.get_bridge_account(self.role).await? {
            match self.pds.refresh_session(&account.refresh_token).await {
                Ok(session) => {
                    self.store
                        .update_bridge_account_tokens(self.role, &session.access_jwt, &session.refresh_jwt)
                        .await?;
                    return self.store.get_bridge_account(self.role).await?.ok_or(Error::NotFound);
                }
                Err(_) => match self.pds.create_session(&account.handle, &account.password).await {
                    Ok(session) => {
                        self.store
                            .update_bridge_account_tokens(self.role, &session.access_jwt, &session.refresh_jwt)
                            .await?;
                        return self.store.get_bridge_account(self.role).await?.ok_or(Error::NotFound);
                    }
                    Err(e) => {
                        warn!(role = %self.role, error = %e, "bridge account login failed, recreating");
                        self.store.delete_bridge_account(self.role).await?;
                    }
                },
            }
        }
        self.create_account(profile).await
    }

    async fn create_account(&self, profile: &BridgeAccountProfile) -> Result<BridgeAccount, Error> {
        let password = generate_password();
        let invite_code = self.acquire_invite_code().await;
        let output = self
            .pds
            .create_account(&profile.handle, &password, invite_code.as_deref())
            .await?;
        self.store
            .upsert_bridge_account(
                self.role,
                &output.did,
                &profile.handle,
                &password,
                &output.access_jwt,
                &output.refresh_jwt,
            )
            .await?;
        info!(role = %self.role, did = %output.did, "created bridge account");

        if let Err(e) = self
            .setup_profile(&output.did, &output.access_jwt, profile)
            .await
        {
            warn!(role = %self.role, error = %e, "failed to set up bridge account profile, leaving defaults");
        }

        self.store.get_bridge_account(self.role).await?.ok_or(Error::NotFound)
    }

    /// Writes the singleton `app.bsky.actor.profile` record (spec §4.6: "set up the actor profile
    /// (display name, description, optional avatar uploaded from a URL)").
    async fn setup_profile(&self, did: &str, access_jwt: &str, profile: &BridgeAccountProfile) -> Result<(), Error> {
        let avatar = match &profile.avatar_url {
            Some(url) => self.upload_avatar(access_jwt, url).await.ok(),
            None => None,
        };
        let mut record = serde_json::json!({
            "$type": "app.bsky.actor.profile",
            "displayName": profile.display_name,
            "description": profile.description,
        });
        if let Some(blob) = avatar {
            record["avatar"] = serde_json::json!({
                "$type": "blob",
                "ref": blob.cid_link,
                "mimeType": blob.mime_type,
                "size": blob.size,
            });
        }
        self.pds
            .put_record(access_jwt, did, "app.bsky.actor.profile", "self", record)
            .await?;
        Ok(())
    }

    async fn upload_avatar(&self, access_jwt: &str, url: &str) -> Result<crate::pds_client::BlobRef, Error> {
        const MAX_AVATAR_BYTES: usize = 10 * 1024 * 1024;
        let response = self
            .pds
            .http_client()
            .get(url)
            .send()
            .await
            .map_err(Error::from)?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        if response.content_length().is_some_and(|len| len as usize > MAX_AVATAR_BYTES) {
            return Err(Error::permanent("avatar exceeds 10 MiB limit"));
        }
        let bytes = response.bytes().await.map_err(Error::from)?;
        if bytes.len() > MAX_AVATAR_BYTES {
            return Err(Error::permanent("avatar exceeds 10 MiB limit"));
        }
        self.pds.upload_blob(access_jwt, &mime_type, bytes.to_vec()).await
    }

    /// Best-effort: some PDS deployments run open registration and have no invite codes, or no
    /// admin token is configured at all (spec §4.6).
    async fn acquire_invite_code(&self) -> Option<String> {
        if self.admin_token.is_empty() {
            return None;
        }
        self.pds.create_invite_code(&self.admin_token).await
    }

    /// Runs `op` with the account's current access token, retrying once after a token refresh
    /// if `op` fails with [`Error::Auth`] (spec §4.6: "auto-retry once after a token refresh when
    /// the PDS returns `{status:400, error:ExpiredToken|InvalidToken}`").
    pub async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let account = self
            .store
            .get_bridge_account(self.role)
            .await?
            .ok_or(Error::NotFound)?;
        match op(account.access_token.clone()).await {
            Err(Error::Auth(_)) => {
                let _guard = self.refresh_lock.lock().await;
                let account = self
                    .store
                    .get_bridge_account(self.role)
                    .await?
                    .ok_or(Error::NotFound)?;
                let session = self.pds.refresh_session(&account.refresh_token).await?;
                self.store
                    .update_bridge_account_tokens(self.role, &session.access_jwt, &session.refresh_jwt)
                    .await?;
                op(session.access_jwt).await
            }
            other => other,
        }
    }

    pub fn role(&self) -> BridgeRole {
        self.role
    }
}

/// A random 32-byte password, URL-safe-base64 encoded (spec §4.6).
fn generate_password() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
