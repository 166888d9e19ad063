//! `Person` and `Note` ActivityStreams objects.

use crate::{
    config::Data,
    error::Error,
    fetch::collection_id::CollectionId,
    protocol::{
        helpers::{deserialize_last, deserialize_one_or_many},
        public_key::PublicKey,
        verification::verify_domains_match,
    },
    traits::{Actor, Object},
    AppState,
};
use activitystreams_kinds::{
    actor::PersonType,
    object::{NoteType, TombstoneType},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Person {
    pub id: Url,
    #[serde(rename = "type")]
    pub kind: PersonType,
    pub preferred_username: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub inbox: Url,
    pub outbox: CollectionId<OrderedCollection>,
    pub followers: CollectionId<OrderedCollection>,
    pub following: CollectionId<OrderedCollection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
    pub public_key: PublicKey,
    #[serde(default)]
    pub icon: Option<Image>,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub assertion_method: Vec<AssertionMethod>,
}

/// Remote actors are never persisted (spec §9: only local accounts have durable rows); every
/// dereference goes straight to HTTP, verified against the id's own domain.
#[async_trait]
impl Object for Person {
    type DataType = AppState;
    type Kind = Person;
    type Error = Error;

    fn last_refreshed_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }

    async fn read_from_id(_id: Url, _data: &Data<Self::DataType>) -> Result<Option<Self>, Self::Error> {
        Ok(None)
    }

    async fn into_json(self, _data: &Data<Self::DataType>) -> Result<Self::Kind, Self::Error> {
        Ok(self)
    }

    async fn verify(json: &Self::Kind, expected_domain: &Url, _data: &Data<Self::DataType>) -> Result<(), Self::Error> {
        verify_domains_match(&json.id, expected_domain)
    }

    async fn from_json(json: Self::Kind, _data: &Data<Self::DataType>) -> Result<Self, Self::Error> {
        Ok(json)
    }
}

impl Actor for Person {
    fn public_key_pem(&self) -> &str {
        &self.public_key.public_key_pem
    }

    fn inbox(&self) -> Url {
        self.inbox.clone()
    }

    fn shared_inbox(&self) -> Option<Url> {
        self.endpoints.as_ref().map(|e| e.shared_inbox.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Endpoints {
    pub shared_inbox: Url,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Image {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Url,
}

/// A `Multikey`-style verification method attached under `assertionMethod`, used to advertise
/// the Ed25519 key alongside the RSA `publicKey` used for HTTP Signatures.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssertionMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub controller: Url,
    pub public_key_multibase: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Note {
    pub id: Url,
    #[serde(rename = "type")]
    pub kind: NoteType,
    pub attributed_to: Url,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_map: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_last", rename = "inReplyTo")]
    pub in_reply_to: Option<Url>,
    #[serde(default)]
    pub attachment: Vec<Attachment>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub published: chrono::DateTime<chrono::Utc>,
}

/// The standard fediverse note-delete payload (`{"id":…,"type":"Tombstone"}`), used by Mastodon
/// and other AP servers in place of a full `Note` body for `Delete(object=note)` (spec §4.5).
/// Mirrors the teacher's own `protocol/tombstone.rs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tombstone {
    pub id: Url,
    #[serde(rename = "type")]
    pub kind: TombstoneType,
}

impl Tombstone {
    pub fn new(id: Url) -> Tombstone {
        Tombstone {
            id,
            kind: TombstoneType::Tombstone,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Url,
    pub media_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A full (unpaginated) ordered collection summary, with a link to its first page.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderedCollection {
    pub id: Url,
    #[serde(rename = "type")]
    pub kind: String,
    pub total_items: i64,
    pub first: Url,
}
