//! `KeyPair` rows: per-identifier signing keys (spec §3, §4.7). Keys are never rotated
//! automatically and are stored JWK-encoded.

use super::Store;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tokio::sync::Mutex;

/// Algorithms a local identifier may have a key pair under. Outbound signing always prefers
/// `RsaPkcs1v15` (universally understood by fediverse peers); `Ed25519` is exposed only as an
/// additional `assertionMethod` for forward compatibility (SPEC_FULL §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RsaPkcs1v15,
    Ed25519,
}

impl Algorithm {
    fn as_str(self) -> &'static str {
        match self {
            Algorithm::RsaPkcs1v15 => "rsa-pkcs1-v1.5",
            Algorithm::Ed25519 => "ed25519",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct KeyPair {
    pub user_did: String,
    pub algorithm: String,
    pub public_key: String,
    pub private_key: String,
}

/// A key's two components, JWK-shaped (RFC 7517 field names) so storage doesn't depend on a
/// fragile general-purpose JWK crate the corpus doesn't already use; this bridge only ever
/// round-trips its own keys, so a minimal struct covering the fields it actually writes suffices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

impl Store {
    /// Serialized per-identifier, per-algorithm generation: the first caller wins and every
    /// other concurrent caller observes its write (spec §5, "Key-pair generation is serialized
    /// per identifier").
    pub async fn get_or_create_keypair(
        &self,
        user_did: &str,
        algorithm: Algorithm,
    ) -> Result<KeyPair, Error> {
        static LOCK: Mutex<()> = Mutex::const_new(());
        if let Some(existing) = self.get_keypair(user_did, algorithm).await? {
            return Ok(existing);
        }
        let _guard = LOCK.lock().await;
        if let Some(existing) = self.get_keypair(user_did, algorithm).await? {
            return Ok(existing);
        }
        let (public_key, private_key) = match algorithm {
            Algorithm::RsaPkcs1v15 => {
                let pair = crate::http_signatures::generate_actor_keypair()?;
                (pair.public_key, pair.private_key)
            }
            Algorithm::Ed25519 => generate_ed25519_jwk_pair()?,
        };
        sqlx::query(
            "INSERT INTO keypairs (user_did, algorithm, public_key, private_key)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_did, algorithm) DO NOTHING",
        )
        .bind(user_did)
        .bind(algorithm.as_str())
        .bind(&public_key)
        .bind(&private_key)
        .execute(self.pool())
        .await?;
        self.get_keypair(user_did, algorithm)
            .await?
            .ok_or_else(|| Error::other(anyhow::anyhow!("keypair vanished after insert")))
    }

    pub async fn get_keypair(
        &self,
        user_did: &str,
        algorithm: Algorithm,
    ) -> Result<Option<KeyPair>, Error> {
        let row = sqlx::query_as::<_, KeyPair>(
            "SELECT user_did, algorithm, public_key, private_key
             FROM keypairs WHERE user_did = $1 AND algorithm = $2",
        )
        .bind(user_did)
        .bind(algorithm.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn delete_keypairs(&self, user_did: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM keypairs WHERE user_did = $1")
            .bind(user_did)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn generate_ed25519_jwk_pair() -> Result<(String, String), Error> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    let mut csprng = OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let verifying_key = signing_key.verifying_key();

    let x = URL_SAFE_NO_PAD.encode(verifying_key.to_bytes());
    let d = URL_SAFE_NO_PAD.encode(signing_key.to_bytes());

    let public = Jwk {
        kty: "OKP".to_string(),
        crv: Some("Ed25519".to_string()),
        x: Some(x),
        n: None,
        e: None,
        d: None,
    };
    let private = Jwk {
        d: Some(d),
        ..public.clone()
    };
    Ok((
        serde_json::to_string(&public).map_err(Error::from)?,
        serde_json::to_string(&private).map_err(Error::from)?,
    ))
}
