//! The `publicKey` object embedded in actor representations.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublicKey {
    pub id: String,
    pub owner: Url,
    pub public_key_pem: String,
}

impl PublicKey {
    pub fn new(owner: Url, public_key_pem: String) -> Self {
        let id = main_key_id(&owner);
        PublicKey {
            id,
            owner,
            public_key_pem,
        }
    }
}

/// The conventional fragment identifier for an actor's primary key.
pub fn main_key_id(owner: &Url) -> String {
    format!("{owner}#main-key")
}
