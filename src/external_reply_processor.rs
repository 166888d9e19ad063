//! Polls the backlink source for replies to locally-bridged posts that never crossed this PDS's
//! own firehose (spec §4.9): a reply made on a different PDS shows up here, not in
//! [`crate::firehose`].

use crate::{
    config::FederationConfig,
    converters::{
        post::{actor_url, post_object_url, render_html, resolve_local_mentions, PostRecord},
        ConversionEnv,
    },
    error::Error,
    protocol::activities::{Create, PersonAcceptedActivities},
    protocol::objects::Note,
    store::{bridge_account::BridgeRole, keypair::Algorithm, monitored_post::MonitoredPost},
    AppState,
};
use activitystreams_kinds::object::NoteType;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, warn};
use url::Url;

/// Constellation `source` parameter: the record path this bridge watches for inbound replies.
const REPLY_BACKLINK_SOURCE: &str = "app.bsky.feed.post:.reply.parent.uri";
const BACKLINKS_PAGE_LIMIT: u32 = 100;
const MONITORED_POSTS_PER_CYCLE: i64 = 50;

/// Single-task timer loop (spec §5): one poll cycle per `constellation.poll_interval_secs`.
pub struct ExternalReplyProcessor {
    config: FederationConfig<AppState>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
}

impl ExternalReplyProcessor {
    pub fn new(config: FederationConfig<AppState>, poll_interval: Duration) -> Self {
        ExternalReplyProcessor {
            config,
            poll_interval,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A handle the shutdown sequence flips to stop scheduling further cycles (spec §5).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub async fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "external reply processor cycle failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn run_cycle(&self) -> Result<(), Error> {
        let posts = self
            .config
            .store
            .list_monitored_posts_for_polling(MONITORED_POSTS_PER_CYCLE)
            .await?;
        for post in posts {
            // Every poll advances `lastChecked` regardless of outcome (spec §4.9), so a post
            // whose backlink fetch keeps failing doesn't monopolize the front of the queue.
            if let Err(e) = self.poll_post(&post).await {
                warn!(error = %e, at_uri = %post.at_uri, "failed to poll post for external replies");
            }
            self.config.store.mark_monitored_post_checked(&post.at_uri).await?;
        }
        Ok(())
    }

    async fn poll_post(&self, post: &MonitoredPost) -> Result<(), Error> {
        let mut cursor = None;
        loop {
            let page = self
                .config
                .constellation
                .get_backlinks(&post.at_uri, REPLY_BACKLINK_SOURCE, BACKLINKS_PAGE_LIMIT, cursor.as_deref())
                .await?;
            for link in &page.links {
                let reply_at_uri = format!("at://{}/{}/{}", link.did, link.collection, link.rkey);
                if self.config.store.external_reply_exists(&reply_at_uri).await? {
                    continue;
                }
                if let Err(e) = self.bridge_reply(post, &link.did, &reply_at_uri).await {
                    warn!(error = %e, reply = %reply_at_uri, "failed to bridge external reply");
                }
            }
            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(())
    }

    async fn bridge_reply(&self, post: &MonitoredPost, reply_repo: &str, reply_at_uri: &str) -> Result<(), Error> {
        let (_, collection, rkey) = split_at_uri(reply_at_uri)?;
        let record = self.config.app_view.get_record(reply_repo, collection, rkey).await?;
        let reply_record: PostRecord = serde_json::from_value(record.value)?;

        let bridge = self
            .config
            .store
            .get_bridge_account(BridgeRole::Bluesky)
            .await?
            .ok_or_else(|| Error::permanent("Bluesky bridge account unavailable"))?;
        let bridge_actor_id = actor_url(&self.config.settings.public_url, &bridge.did);
        let rsa = self
            .config
            .store
            .get_or_create_keypair(&bridge.did, Algorithm::RsaPkcs1v15)
            .await?;

        let note_id = post_object_url(&self.config.settings.public_url, reply_at_uri)?;
        let attribution = format!(
            r#"<p><a href="https://bsky.app/profile/{reply_repo}">@{reply_repo}</a> replied on Bluesky:</p>"#
        );
        let env = ConversionEnv {
            local_hostname: &self.config.settings.hostname,
            public_url: &self.config.settings.public_url,
            pds: &self.config.pds,
            allow_private_address: self.config.settings.allow_private_address,
        };
        let local_mentions = resolve_local_mentions(&env, &reply_record.facets).await;
        let content = format!(
            "{attribution}{}",
            render_html(&reply_record.text, &reply_record.facets, &self.config.settings.hostname, &|did| {
                local_mentions.contains(did)
            })
        );

        let note = Note {
            id: note_id.clone(),
            kind: NoteType::default(),
            attributed_to: bridge_actor_id.clone(),
            content,
            content_map: None,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
            cc: vec![format!("{bridge_actor_id}/followers")],
            in_reply_to: Some(post_object_url(&self.config.settings.public_url, &post.at_uri)?),
            attachment: vec![],
            sensitive: false,
            summary: None,
            published: chrono::Utc::now(),
        };
        let create = Create {
            actor: crate::fetch::object_id::ObjectId::from(bridge_actor_id.clone()),
            object: note,
            kind: Default::default(),
            id: Url::parse(&format!("{note_id}/activity"))?,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
            cc: vec![format!("{bridge_actor_id}/followers")],
        };

        self.config
            .dispatcher
            .dispatch_to_followers(
                &self.config.store,
                &post.author_did,
                bridge_actor_id,
                rsa.private_key,
                PersonAcceptedActivities::Create(create.clone()),
                false,
            )
            .await?;

        self.config
            .store
            .create_external_reply(reply_at_uri, &post.at_uri, reply_repo, create.object.id.as_str())
            .await?;
        info!(reply = %reply_at_uri, post = %post.at_uri, "bridged external reply");
        Ok(())
    }
}

fn split_at_uri(at_uri: &str) -> Result<(&str, &str, &str), Error> {
    let rest = at_uri.strip_prefix("at://").ok_or_else(|| Error::permanent("malformed atUri"))?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?;
    let collection = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?;
    let rkey = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?;
    Ok((repo, collection, rkey))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_at_uri_rejects_non_at_scheme() {
        assert!(split_at_uri("https://example.com").is_err());
    }

    #[test]
    fn split_at_uri_extracts_three_parts() {
        let (repo, collection, rkey) = split_at_uri("at://did:plc:x/app.bsky.feed.post/abc").unwrap();
        assert_eq!(repo, "did:plc:x");
        assert_eq!(collection, "app.bsky.feed.post");
        assert_eq!(rkey, "abc");
    }
}
