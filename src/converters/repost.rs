//! `app.bsky.feed.repost` → `Announce` (spec §4.2). One-way, symmetric to [`super::like`].

use super::{is_local_did, post::actor_url, ConversionEnv, Converter, InboundRecord, OutboundActivity};
use crate::{error::Error, protocol::activities::PersonAcceptedActivities};
use activitystreams_kinds::activity::AnnounceType;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

pub struct RepostConverter;

#[derive(Debug, Deserialize)]
struct RepostRecord {
    subject: Subject,
}

#[derive(Debug, Deserialize)]
struct Subject {
    uri: String,
}

#[async_trait::async_trait]
impl Converter for RepostConverter {
    async fn to_activity_pub(
        &self,
        at_uri: &str,
        record: &Value,
        env: &ConversionEnv<'_>,
    ) -> Result<Option<OutboundActivity>, Error> {
        let repost: RepostRecord = serde_json::from_value(record.clone())?;
        let Some(reposted_post_did) = repost
            .subject
            .uri
            .strip_prefix("at://")
            .and_then(|rest| rest.split('/').next())
        else {
            return Ok(None);
        };
        if !is_local_did(env, reposted_post_did).await {
            return Ok(None);
        }

        let reposter_did = at_uri
            .strip_prefix("at://")
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| Error::permanent("malformed atUri"))?;
        let actor = actor_url(env.public_url, reposter_did);
        let encoded = utf8_percent_encode(at_uri, NON_ALPHANUMERIC).to_string();
        let id = Url::parse(&format!("{}/reposts/{encoded}", env.public_url))?;

        let activity = crate::protocol::activities::Announce {
            actor: crate::fetch::object_id::ObjectId::from(actor.clone()),
            object: super::post::post_object_url(env.public_url, &repost.subject.uri)?,
            kind: AnnounceType::default(),
            id,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
            cc: vec![format!("{actor}/followers")],
        };
        Ok(Some(OutboundActivity::Bare(PersonAcceptedActivities::Announce(
            activity,
        ))))
    }

    async fn to_record(
        &self,
        _object: &Value,
        _env: &ConversionEnv<'_>,
    ) -> Result<Option<InboundRecord>, Error> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repost_id_percent_encodes_the_subject_at_uri() {
        let at_uri = "at://did:plc:alice/app.bsky.feed.repost/abc";
        let encoded = utf8_percent_encode(at_uri, NON_ALPHANUMERIC).to_string();
        assert!(encoded.contains("at%3A%2F%2F"));
        assert!(!encoded.contains(':'));
        assert!(!encoded.contains('/'));
    }

    #[tokio::test]
    async fn to_record_is_one_way() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let pds = crate::pds_client::PdsClient::new("https://pds.example.com".to_string(), client);
        let env = ConversionEnv {
            local_hostname: "example.com",
            public_url: "https://example.com",
            pds: &pds,
            allow_private_address: false,
        };
        let result = RepostConverter.to_record(&Value::Null, &env).await.expect("to_record never errors");
        assert!(result.is_none());
    }
}
