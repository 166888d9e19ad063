//! The HTTP surface: actor/collection endpoints, inbox ingestion, WebFinger, NodeInfo
//! (spec §6). CLI parsing, TLS termination and request logging middleware are out of scope
//! (spec §1) and live in [`crate`]'s binary entry point instead.

use crate::{
    actor_dispatcher::ActorDispatcher,
    config::{Data, FederationConfig},
    error::Error,
    fetch::{
        object_id::ObjectId,
        webfinger::{build_webfinger_response, extract_webfinger_name},
    },
    http_signatures::{signature_nonce, signing_actor, verify_body_hash, verify_signature},
    protocol::{
        activities::PersonAcceptedActivities,
        collections::{next_page_link, OrderedCollectionPage},
        objects::Person,
    },
    store::bridge_account::BridgeRole,
    traits::ActivityHandler,
    AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

const ACTIVITY_JSON: &str = "application/activity+json";

/// Assembles the full router, installing [`crate::config::FederationMiddleware`] so every
/// handler can extract [`Data<AppState>`].
pub fn build_router(config: FederationConfig<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/webfinger", get(webfinger))
        .route("/nodeinfo/2.1", get(nodeinfo))
        .route("/users/:did", get(get_actor))
        .route("/users/:did/inbox", post(post_actor_inbox))
        .route("/users/:did/outbox", get(get_outbox))
        .route("/users/:did/followers", get(get_followers))
        .route("/users/:did/following", get(get_following))
        .route("/inbox", post(post_shared_inbox))
        .route("/posts/:at_uri", get(get_post))
        .layer(tower::layer::layer_fn(move |inner| {
            crate::config::FederationMiddleware::new(config.clone()).layer(inner)
        }))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct WebfingerQuery {
    resource: String,
}

async fn webfinger(
    data: Data<AppState>,
    Query(query): Query<WebfingerQuery>,
) -> Result<Response, Error> {
    let (username, domain) = extract_webfinger_name(&query.resource)?;
    if domain != data.domain() {
        return Err(Error::NotFound);
    }
    let did = resolve_handle_to_did(&data, &username).await?;
    let dispatcher = actor_dispatcher_for(&data).await?;
    let Some(_person) = dispatcher.dispatch(&did).await? else {
        return Err(Error::NotFound);
    };
    let actor_id = crate::converters::post::actor_url(&data.settings.public_url, &did);
    let jrd = build_webfinger_response(query.resource.clone(), actor_id);
    Ok((
        [("content-type", "application/jrd+json")],
        Json(jrd),
    )
        .into_response())
}

async fn resolve_handle_to_did(data: &Data<AppState>, username: &str) -> Result<String, Error> {
    let handle = format!("{username}.{}", data.settings.hostname);
    let resolved = data.pds.resolve_handle(&handle).await?;
    Ok(resolved.did)
}

async fn nodeinfo(data: Data<AppState>) -> Result<Json<serde_json::Value>, Error> {
    let total = match data.pds.list_repos(None).await {
        Ok(value) => value
            .get("repos")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len)
            .unwrap_or(0),
        Err(_) => 0,
    };
    Ok(Json(json!({
        "version": "2.1",
        "software": { "name": "apbridge", "version": env!("CARGO_PKG_VERSION") },
        "protocols": ["activitypub"],
        "services": { "inbound": [], "outbound": [] },
        "openRegistrations": false,
        "usage": { "users": { "total": total }, "localPosts": 0 },
        "metadata": {}
    })))
}

async fn actor_dispatcher_for(data: &Data<AppState>) -> Result<ActorDispatcher, Error> {
    let mastodon_bridge_did = data
        .store
        .get_bridge_account(BridgeRole::Mastodon)
        .await?
        .map(|account| account.did);
    Ok(ActorDispatcher::new(
        data.store.clone(),
        data.pds.clone(),
        data.settings.pds.url.clone(),
        data.settings.public_url.clone(),
        mastodon_bridge_did,
    ))
}

async fn get_actor(data: Data<AppState>, Path(did): Path<String>) -> Result<Response, Error> {
    let dispatcher = actor_dispatcher_for(&data).await?;
    let Some(person) = dispatcher.dispatch(&did).await? else {
        return Err(Error::NotFound);
    };
    Ok(([("content-type", ACTIVITY_JSON)], Json(person)).into_response())
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    cursor: Option<String>,
}

async fn get_followers(
    data: Data<AppState>,
    Path(did): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Response, Error> {
    let cursor = parse_cursor(query.cursor.as_deref());
    let page = data.store.get_followers_page(&did, 50, cursor).await?;
    let actor_id = crate::converters::post::actor_url(&data.settings.public_url, &did);
    let collection_id: url::Url = format!("{actor_id}/followers").parse()?;
    let mut base = collection_id.clone();
    base.set_query(None);
    let next = next_page_link(&base, page.next_cursor);
    let items = page
        .items
        .into_iter()
        .map(|f| serde_json::Value::String(f.actor_uri))
        .collect();
    let response = OrderedCollectionPage::new(collection_id.clone(), collection_id, items, next);
    Ok(([("content-type", ACTIVITY_JSON)], Json(response)).into_response())
}

/// Outbound Follows are not persisted (see `DESIGN.md`'s Open Question resolution), so every
/// local account's `following` collection is always empty.
async fn get_following(
    data: Data<AppState>,
    Path(did): Path<String>,
) -> Result<Response, Error> {
    let actor_id = crate::converters::post::actor_url(&data.settings.public_url, &did);
    let collection_id: url::Url = format!("{actor_id}/following").parse()?;
    let response = OrderedCollectionPage::new(collection_id.clone(), collection_id, vec![], None);
    Ok(([("content-type", ACTIVITY_JSON)], Json(response)).into_response())
}

/// The outbox is addressed, not archival: this bridge delivers directly to followers as records
/// are created rather than maintaining a queryable history, so it is served empty.
async fn get_outbox(data: Data<AppState>, Path(did): Path<String>) -> Result<Response, Error> {
    let actor_id = crate::converters::post::actor_url(&data.settings.public_url, &did);
    let collection_id: url::Url = format!("{actor_id}/outbox").parse()?;
    let response = OrderedCollectionPage::new(collection_id.clone(), collection_id, vec![], None);
    Ok(([("content-type", ACTIVITY_JSON)], Json(response)).into_response())
}

fn parse_cursor(raw: Option<&str>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

async fn get_post(data: Data<AppState>, Path(at_uri): Path<String>) -> Result<Response, Error> {
    let at_uri = percent_encoding::percent_decode_str(&at_uri)
        .decode_utf8()
        .map_err(|_| Error::permanent("post id is not valid UTF-8"))?
        .to_string();
    let (repo, collection, rkey) = split_at_uri(&at_uri)?;
    let record = data.pds.get_record(&repo, &collection, &rkey).await?;
    let converter = data
        .converters
        .get(&collection)
        .ok_or_else(|| Error::permanent("no converter for this collection"))?;
    let env = crate::converters::ConversionEnv {
        local_hostname: &data.settings.hostname,
        public_url: &data.settings.public_url,
        pds: &data.pds,
        allow_private_address: data.settings.allow_private_address,
    };
    let Some(outbound) = converter
        .to_activity_pub(&at_uri, &record.value, &env)
        .await?
    else {
        return Err(Error::NotFound);
    };
    let object = match outbound {
        crate::converters::OutboundActivity::Object(PersonAcceptedActivities::Create(create)) => {
            serde_json::to_value(create.object).map_err(Error::from)?
        }
        _ => return Err(Error::permanent("post converter did not produce a Note")),
    };
    Ok(([("content-type", ACTIVITY_JSON)], Json(object)).into_response())
}

fn split_at_uri(at_uri: &str) -> Result<(String, String, String), Error> {
    let rest = at_uri
        .strip_prefix("at://")
        .ok_or_else(|| Error::permanent("malformed atUri"))?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?.to_string();
    let collection = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?.to_string();
    let rkey = parts.next().ok_or_else(|| Error::permanent("malformed atUri"))?.to_string();
    Ok((repo, collection, rkey))
}

async fn post_shared_inbox(
    data: Data<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Response> {
    handle_inbox(data, method, uri, headers, body).await
}

async fn post_actor_inbox(
    data: Data<AppState>,
    Path(_did): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Response> {
    handle_inbox(data, method, uri, headers, body).await
}

/// Shared by both the collection and per-actor inbox endpoints (spec §4.5, §6). HTTP Signature
/// verification and JSON deserialization failures map to 401/400 directly; once an activity is
/// accepted for processing, activity-level failures are logged and swallowed with a 2xx so the
/// sender does not retry, while store/network failures propagate as 5xx (spec §4.5 "Failure
/// semantics", §7).
async fn handle_inbox(
    data: Data<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Response> {
    verify_body_hash(headers.get("digest"), &body).map_err(IntoResponse::into_response)?;

    let claimed_actor = signing_actor(&headers).map_err(IntoResponse::into_response)?;
    let public_key_pem = match data.store.cached_actor_public_key(claimed_actor.as_str()).await {
        Some(pem) => pem,
        None => {
            let actor: Person = ObjectId::<Person>::from(claimed_actor.clone())
                .dereference(&data)
                .await
                .map_err(|_| Error::SignatureInvalid.into_response())?;
            data.store
                .cache_actor_public_key(claimed_actor.as_str(), actor.public_key.public_key_pem.clone())
                .await;
            actor.public_key.public_key_pem
        }
    };
    verify_signature(&method, &uri, &headers, &public_key_pem)
        .map_err(IntoResponse::into_response)?;

    let nonce = signature_nonce(&headers).map_err(IntoResponse::into_response)?;
    let is_new = data
        .store
        .record_nonce_if_new(&nonce)
        .await
        .map_err(IntoResponse::into_response)?;
    if !is_new {
        warn!("rejected replayed inbox signature");
        return Err(Error::SignatureInvalid.into_response());
    }

    let activity: PersonAcceptedActivities = serde_json::from_slice(&body)
        .map_err(|e| Error::permanent(e).into_response())?;

    match process_activity(activity, &data).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(e) if e.is_no_retry() => {
            warn!(error = %e, "inbox activity dropped after failure");
            Ok(StatusCode::ACCEPTED)
        }
        Err(e) => Err(e.into_response()),
    }
}

async fn process_activity(
    activity: PersonAcceptedActivities,
    data: &Data<AppState>,
) -> Result<(), Error> {
    activity.verify(data).await?;
    activity.receive(data).await
}
