//! `app.bsky.feed.like` → `Like` (spec §4.2). One-way: AP→AT likes are not converted back.

use super::{is_local_did, post::actor_url, ConversionEnv, Converter, OutboundActivity};
use crate::{error::Error, protocol::activities::PersonAcceptedActivities};
use activitystreams_kinds::activity::LikeType;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

pub struct LikeConverter;

#[derive(Debug, Deserialize)]
struct LikeRecord {
    subject: Subject,
}

#[derive(Debug, Deserialize)]
struct Subject {
    uri: String,
}

#[async_trait::async_trait]
impl Converter for LikeConverter {
    async fn to_activity_pub(
        &self,
        at_uri: &str,
        record: &Value,
        env: &ConversionEnv<'_>,
    ) -> Result<Option<OutboundActivity>, Error> {
        let like: LikeRecord = serde_json::from_value(record.clone())?;
        let Some(liked_post_did) = subject_author(&like.subject.uri) else {
            return Ok(None);
        };
        if !is_local_did(env, &liked_post_did).await {
            return Ok(None);
        }

        let liker_did = at_uri
            .strip_prefix("at://")
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| Error::permanent("malformed atUri"))?;
        let actor = actor_url(env.public_url, liker_did);
        let encoded = utf8_percent_encode(at_uri, NON_ALPHANUMERIC).to_string();
        let id = Url::parse(&format!("{}/likes/{encoded}", env.public_url))?;

        let activity = crate::protocol::activities::Like {
            actor: crate::fetch::object_id::ObjectId::from(actor.clone()),
            object: super::post::post_object_url(env.public_url, &like.subject.uri)?,
            kind: LikeType::default(),
            id,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
            cc: vec![format!("{actor}/followers")],
        };
        Ok(Some(OutboundActivity::Bare(PersonAcceptedActivities::Like(
            activity,
        ))))
    }
}

/// Pulls the author DID out of the liked post's atUri; locality is resolved separately via
/// [`is_local_did`] (spec §4.2: "emits an AP Like only when the liked post's DID is a local PDS
/// account").
fn subject_author(subject_uri: &str) -> Option<String> {
    subject_uri
        .strip_prefix("at://")
        .and_then(|rest| rest.split('/').next())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_author_extracts_did() {
        assert_eq!(
            subject_author("at://did:plc:alice/app.bsky.feed.post/abc"),
            Some("did:plc:alice".to_string())
        );
        assert_eq!(subject_author("not-an-at-uri"), None);
    }
}
