//! Polymorphic record↔activity conversion keyed by ATProto collection NSID (spec §4.2).

pub mod like;
pub mod post;
pub mod repost;

use crate::{error::Error, pds_client::PdsClient, protocol::activities::PersonAcceptedActivities};
use serde_json::Value;
use std::collections::HashMap;

/// What `toActivityPub` produces for one record: either a wrapped object (`Create(Note)`) or a
/// bare activity (`Like`, `Announce`).
pub enum OutboundActivity {
    Object(PersonAcceptedActivities),
    Bare(PersonAcceptedActivities),
}

/// What `toRecord` produces for one inbound activity, plus any attachments the converter
/// downloaded but could not itself upload (uploading a PDS blob needs an authenticated bridge
/// token, which the pure converter layer does not hold; the caller uploads these and patches
/// `value["embed"]` before calling `createRecord`, the same way it already patches `reply`).
pub struct InboundRecord {
    pub collection: &'static str,
    pub value: Value,
    pub pending_blobs: Vec<PendingBlob>,
}

/// One downloaded-but-not-yet-uploaded attachment (spec §4.2: "downloaded subject to
/// size/scheme/network-range limits ... and uploaded as PDS blobs").
pub struct PendingBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub alt: Option<String>,
    pub is_video: bool,
}

/// Snapshot of the ambient data a converter needs to translate one record, without ever
/// mutating the Store (spec §4.2 invariant).
pub struct ConversionEnv<'a> {
    pub local_hostname: &'a str,
    pub public_url: &'a str,
    pub pds: &'a PdsClient,
    /// Testing-only escape hatch matching the teacher's own `debug` flag (spec §5: "Downloads ...
    /// to loopback/private IP ranges (unless explicitly permitted by configuration) are
    /// rejected").
    pub allow_private_address: bool,
}

/// Checks whether `did` is hosted on this PDS (spec: "when the referenced DID is local"). A thin
/// wrapper so every converter resolves locality the same way.
pub async fn is_local_did(env: &ConversionEnv<'_>, did: &str) -> bool {
    env.pds.describe_repo(did).await.unwrap_or(false)
}

/// A single collection's bidirectional conversion behavior.
#[async_trait::async_trait]
pub trait Converter: Send + Sync {
    /// Converts a local record into its outbound AP form, or `None` when it must not be
    /// federated (e.g. a like on a non-local post).
    async fn to_activity_pub(
        &self,
        at_uri: &str,
        record: &Value,
        env: &ConversionEnv<'_>,
    ) -> Result<Option<OutboundActivity>, Error>;

    /// Converts an inbound AP object back into an ATProto record, or `None` for converters that
    /// are intentionally one-way.
    async fn to_record(
        &self,
        _object: &Value,
        _env: &ConversionEnv<'_>,
    ) -> Result<Option<InboundRecord>, Error> {
        Ok(None)
    }
}

/// Assembled once at startup (spec §9: "registration is startup-time only; the registry is
/// immutable thereafter").
pub struct ConverterRegistry {
    converters: HashMap<&'static str, Box<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn with_defaults() -> Self {
        let mut converters: HashMap<&'static str, Box<dyn Converter>> = HashMap::new();
        converters.insert("app.bsky.feed.post", Box::new(post::PostConverter));
        converters.insert("app.bsky.feed.like", Box::new(like::LikeConverter));
        converters.insert("app.bsky.feed.repost", Box::new(repost::RepostConverter));
        ConverterRegistry { converters }
    }

    pub fn get(&self, collection: &str) -> Option<&dyn Converter> {
        self.converters.get(collection).map(|b| b.as_ref())
    }
}
