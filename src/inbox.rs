//! The inbox state machine: authenticates, dispatches by activity type, and applies state
//! transitions (spec §4.5).

use crate::{
    config::Data,
    converters::{post::actor_url, ConversionEnv},
    dispatcher::Recipient,
    error::Error,
    protocol::activities::{Accept, Create, Delete, DeleteObject, Follow, Undo, UndoObject},
    store::engagement_event::EngagementKind,
    AppState,
};
use tracing::warn;
use url::Url;

fn local_did_from_actor_url(actor_url: &Url, public_url: &str) -> Option<String> {
    let prefix = format!("{}/users/", public_url.trim_end_matches('/'));
    actor_url.as_str().strip_prefix(&prefix).map(str::to_string)
}

/// **Follow** (spec §4.5): validate object is a local actor, persist the row, dispatch `Accept`.
/// Idempotent on `activityId` via the Store's `ON CONFLICT DO NOTHING`.
pub async fn receive_follow(follow: Follow, data: &Data<AppState>) -> Result<(), Error> {
    let user_did = local_did_from_actor_url(&follow.object, &data.settings.public_url)
        .ok_or_else(|| Error::permanent("Follow object is not a local actor"))?;

    let remote_actor: crate::protocol::objects::Person = follow
        .actor
        .dereference_from_http(data)
        .await
        .map_err(|e: Error| e)
        .or_else(|_| {
            Err::<crate::protocol::objects::Person, Error>(Error::permanent(
                "could not dereference follower actor",
            ))
        })?;

    let shared_inbox = remote_actor.endpoints.as_ref().map(|e| e.shared_inbox.to_string());
    data.store
        .create_follow(
            &user_did,
            follow.actor.inner().as_str(),
            follow.id.as_str(),
            remote_actor.inbox.as_str(),
            shared_inbox.as_deref(),
        )
        .await?;

    let rsa = data
        .store
        .get_or_create_keypair(&user_did, crate::store::keypair::Algorithm::RsaPkcs1v15)
        .await?;
    let local_actor = actor_url(&data.settings.public_url, &user_did);
    let accept_id = follow_accept_id(&follow);
    let recipient = Recipient {
        actor_id: follow.actor.inner().to_string(),
        inbox: remote_actor.inbox.clone(),
        shared_inbox: remote_actor.endpoints.as_ref().map(|e| e.shared_inbox.clone()),
    };
    let accept = Accept::new(local_actor.clone(), follow, accept_id);

    data.dispatcher
        .dispatch_targeted(
            local_actor,
            rsa.private_key,
            crate::protocol::activities::PersonAcceptedActivities::Accept(accept),
            vec![recipient],
            false,
        )
        .await;
    Ok(())
}

fn follow_accept_id(follow: &Follow) -> Url {
    let mut id = follow.id.clone();
    id.set_fragment(Some(&format!("accept-{}", chrono::Utc::now().timestamp_millis())));
    id
}

/// **Undo(Follow)** / **Undo(Like)** / **Undo(Announce)** (spec §4.5).
pub async fn receive_undo(undo: Undo, data: &Data<AppState>) -> Result<(), Error> {
    match undo.object {
        UndoObject::Follow(follow) => {
            let user_did = local_did_from_actor_url(&follow.object, &data.settings.public_url)
                .ok_or_else(|| Error::permanent("Undo(Follow) object is not a local actor"))?;
            data.store.delete_follow(&user_did, undo.actor.inner().as_str()).await?;
        }
        UndoObject::Like(like) => {
            data.store.delete_engagement_event(like.id.as_str()).await?;
        }
        UndoObject::Announce(announce) => {
            data.store.delete_engagement_event(announce.id.as_str()).await?;
        }
    }
    Ok(())
}

/// **Like** / **Announce** (spec §4.5): record engagement only when the target post belongs to a
/// local account.
pub async fn receive_like_or_announce(
    activity_id: Url,
    actor_id: Url,
    object: Url,
    kind: EngagementKind,
    data: &Data<AppState>,
) -> Result<(), Error> {
    let Some(at_uri) = at_uri_from_post_url(&object, &data.settings.public_url) else {
        warn!(%object, "engagement target is not a local post url, ignoring");
        return Ok(());
    };
    let Some(author_did) = at_uri.strip_prefix("at://").and_then(|r| r.split('/').next()) else {
        return Ok(());
    };
    data.store
        .create_engagement_event(
            activity_id.as_str(),
            kind,
            &at_uri,
            author_did,
            actor_id.as_str(),
        )
        .await?;
    Ok(())
}

fn at_uri_from_post_url(url: &Url, public_url: &str) -> Option<String> {
    let prefix = format!("{}/posts/", public_url.trim_end_matches('/'));
    let encoded = url.as_str().strip_prefix(&prefix)?;
    percent_encoding::percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.to_string())
}

/// **Create(Note)** (spec §4.5): only processed when it replies to a local post and the Mastodon
/// bridge account is available.
pub async fn receive_create_note(create: Create, data: &Data<AppState>) -> Result<(), Error> {
    let Some(in_reply_to) = &create.object.in_reply_to else {
        return Ok(());
    };
    let Some(parent_at_uri) = at_uri_from_post_url(in_reply_to, &data.settings.public_url) else {
        return Ok(());
    };

    let Some(bridge_did) = data
        .store
        .get_bridge_account(crate::store::bridge_account::BridgeRole::Mastodon)
        .await?
        .map(|b| b.did)
    else {
        warn!("Mastodon bridge account unavailable, dropping inbound reply");
        return Ok(());
    };

    let parent = data
        .pds
        .get_record(
            parent_at_uri
                .strip_prefix("at://")
                .and_then(|r| r.split('/').next())
                .unwrap_or_default(),
            "app.bsky.feed.post",
            parent_at_uri.rsplit('/').next().unwrap_or_default(),
        )
        .await?;

    let remote_actor: crate::protocol::objects::Person = create
        .actor
        .dereference(data)
        .await
        .map_err(|e: Error| e)?;
    let actor_link = format!(
        r#"<p><a href="{}">{}</a> replied:</p>"#,
        escape_href(create.actor.inner()),
        escape_text(&actor_handle(&remote_actor))
    );
    let mut note_with_attribution = create.object.clone();
    note_with_attribution.content = format!("{actor_link}{}", note_with_attribution.content);

    let env = ConversionEnv {
        local_hostname: &data.settings.hostname,
        public_url: &data.settings.public_url,
        pds: &data.pds,
        allow_private_address: data.settings.allow_private_address,
    };
    let converter = data
        .converters
        .get("app.bsky.feed.post")
        .expect("post converter is always registered");
    let converted = converter
        .to_record(&serde_json::to_value(&note_with_attribution)?, &env)
        .await?
        .ok_or_else(|| Error::permanent("post converter refused inbound Note"))?;

    let mut record = converted.value;
    let root = parent
        .value
        .pointer("/reply/root")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({ "uri": parent.uri, "cid": parent.cid }));
    record["reply"] = serde_json::json!({
        "root": root,
        "parent": { "uri": parent.uri, "cid": parent.cid },
    });

    let bridge_manager = data.bridge_manager(crate::store::bridge_account::BridgeRole::Mastodon);
    if let Some(embed) = upload_pending_blobs(converted.pending_blobs, bridge_manager, data).await? {
        record["embed"] = embed;
    }

    let created = bridge_manager
        .with_retry(|token| data.pds.create_record(&token, &bridge_did, converted.collection, record.clone()))
        .await?;

    data.store
        .create_post_mapping(
            &created.uri,
            create.object.id.as_str(),
            create.actor.inner().as_str(),
            remote_actor.inbox.as_str(),
        )
        .await?;
    Ok(())
}

/// Renders `@preferredUsername@host` from a dereferenced remote actor, the display form spec
/// §4.5's inbound-reply attribution and §4.8's engagement-notifier actor resolution both use.
fn actor_handle(actor: &crate::protocol::objects::Person) -> String {
    let host = actor.id.host_str().unwrap_or("unknown");
    format!("@{}@{}", actor.preferred_username, host)
}

/// Uploads attachments the post converter downloaded but could not itself upload (spec §4.2:
/// `toRecord` needs an authenticated bridge token it does not hold), building the
/// `app.bsky.embed.images`/`app.bsky.embed.video` value the caller patches onto the new record.
async fn upload_pending_blobs(
    pending: Vec<crate::converters::PendingBlob>,
    bridge_manager: &crate::bridge_accounts::BridgeAccountManager,
    data: &Data<AppState>,
) -> Result<Option<serde_json::Value>, Error> {
    if pending.is_empty() {
        return Ok(None);
    }
    let is_video = pending[0].is_video;
    let mut blobs = Vec::with_capacity(pending.len());
    for blob in pending {
        let mime_type = blob.mime_type.clone();
        let bytes = blob.bytes.clone();
        let uploaded = bridge_manager
            .with_retry(|token| data.pds.upload_blob(&token, &mime_type, bytes.clone()))
            .await?;
        blobs.push(serde_json::json!({
            "blob": {
                "$type": "blob",
                "ref": uploaded.cid_link,
                "mimeType": uploaded.mime_type,
                "size": uploaded.size,
            },
            "alt": blob.alt.unwrap_or_default(),
        }));
    }
    if is_video {
        Ok(blobs.into_iter().next().map(|image| {
            serde_json::json!({
                "$type": "app.bsky.embed.video",
                "video": image["blob"],
                "alt": image["alt"],
            })
        }))
    } else {
        Ok(Some(serde_json::json!({
            "$type": "app.bsky.embed.images",
            "images": blobs,
        })))
    }
}

fn escape_href(url: &Url) -> String {
    if matches!(url.scheme(), "http" | "https") {
        url.to_string()
    } else {
        String::new()
    }
}

fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// **Delete(Note)** / **Delete(actor)** (spec §4.5).
pub async fn receive_delete(delete: Delete, data: &Data<AppState>) -> Result<(), Error> {
    match &delete.object {
        // Spec §4.5 "Delete(object=note)": look up by note id regardless of whether the sender
        // echoed the full `Note` back or sent the standard `Tombstone` shape (Mastodon and most
        // other AP servers never send the former).
        DeleteObject::Note(_) | DeleteObject::Tombstone(_) => {
            let note_id = delete.object.id();
            if let Some(mapping) = data.store.get_post_mapping_by_note_id(note_id.as_str()).await? {
                let (repo, collection, rkey) = split_at_uri(&mapping.at_uri)?;
                data.bridge_manager(crate::store::bridge_account::BridgeRole::Mastodon)
                    .with_retry(|token| data.pds.delete_record(&token, &repo, &collection, &rkey))
                    .await?;
                data.store.delete_post_mapping(&mapping.at_uri).await?;
            }
        }
        DeleteObject::Id(actor_id) => {
            data.store.delete_follows_by_actor(actor_id.as_str()).await?;
            data.store.delete_engagement_events_by_actor(actor_id.as_str()).await?;
            data.store.delete_post_mappings_by_actor(actor_id.as_str()).await?;
        }
    }
    Ok(())
}

fn split_at_uri(at_uri: &str) -> Result<(String, String, String), Error> {
    let rest = at_uri.strip_prefix("at://").ok_or_else(|| Error::permanent("malformed atUri"))?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?.to_string();
    let collection = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?.to_string();
    let rkey = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?.to_string();
    Ok((repo, collection, rkey))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_did_from_actor_url_strips_the_users_prefix() {
        let url: Url = "https://bridge.example/users/did:plc:alice".parse().unwrap();
        assert_eq!(
            local_did_from_actor_url(&url, "https://bridge.example"),
            Some("did:plc:alice".to_string())
        );
    }

    #[test]
    fn local_did_from_actor_url_rejects_a_foreign_origin() {
        let url: Url = "https://remote.example/users/did:plc:alice".parse().unwrap();
        assert_eq!(local_did_from_actor_url(&url, "https://bridge.example"), None);
    }

    #[test]
    fn at_uri_from_post_url_round_trips_a_percent_encoded_uri() {
        let at_uri = "at://did:plc:alice/app.bsky.feed.post/k1";
        let encoded = percent_encoding::utf8_percent_encode(at_uri, percent_encoding::NON_ALPHANUMERIC);
        let url: Url = format!("https://bridge.example/posts/{encoded}").parse().unwrap();
        assert_eq!(
            at_uri_from_post_url(&url, "https://bridge.example"),
            Some(at_uri.to_string())
        );
    }

    #[test]
    fn at_uri_from_post_url_rejects_urls_outside_the_posts_namespace() {
        let url: Url = "https://bridge.example/users/did:plc:alice".parse().unwrap();
        assert_eq!(at_uri_from_post_url(&url, "https://bridge.example"), None);
    }

    #[test]
    fn split_at_uri_parses_repo_collection_and_rkey() {
        let (repo, collection, rkey) =
            split_at_uri("at://did:plc:alice/app.bsky.feed.post/k1").unwrap();
        assert_eq!(repo, "did:plc:alice");
        assert_eq!(collection, "app.bsky.feed.post");
        assert_eq!(rkey, "k1");
    }

    #[test]
    fn split_at_uri_rejects_a_non_at_uri() {
        assert!(split_at_uri("https://example.com/x").is_err());
    }

    #[test]
    fn escape_href_keeps_http_and_https_only() {
        let https: Url = "https://remote.example/users/bob".parse().unwrap();
        assert_eq!(escape_href(&https), "https://remote.example/users/bob");
        let custom: Url = "gemini://remote.example/users/bob".parse().unwrap();
        assert_eq!(escape_href(&custom), "");
    }

    #[test]
    fn escape_text_escapes_html_metacharacters() {
        assert_eq!(escape_text("<b>bob & alice</b>"), "&lt;b&gt;bob &amp; alice&lt;/b&gt;");
    }

    #[test]
    fn follow_accept_id_sets_a_distinct_fragment_on_the_follow_id() {
        let follow = Follow::new(
            "https://remote.example/users/bob".parse().unwrap(),
            "https://bridge.example/users/did:plc:alice".parse().unwrap(),
            "https://remote.example/users/bob/follows/1".parse().unwrap(),
        );
        let id = follow_accept_id(&follow);
        assert!(id.fragment().unwrap().starts_with("accept-"));
        assert_eq!(id.path(), follow.id.path());
    }
}
