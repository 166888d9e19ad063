//! End-to-end delivery tests standing a real HTTP server in for a remote AP peer, grounded on
//! the teacher's `examples/local_federation` pattern of federating real in-process HTTP servers
//! rather than mocking the transport away (spec §8 scenario 1: "Accept a remote Follow").
//!
//! This does not touch the Store (which needs a real Postgres instance); it exercises the
//! signing/delivery path end to end. The signature round trip itself (sign then verify against
//! the same request) follows the teacher's own `http_signatures::test::test_verify` shape.

use apbridge::activity_sending::SendActivityTask;
use apbridge::config::{Data, FederationConfig};
use apbridge::http_signatures::{generate_actor_keypair, sign_request, verify_body_hash, verify_signature};
use apbridge::protocol::activities::{Accept, Follow};
use axum::{extract::State, routing::post, Router};
use bytes::Bytes;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Clone, Default)]
struct ReceivedInbox(Arc<Mutex<Vec<Bytes>>>);

async fn capture_inbox(State(state): State<ReceivedInbox>, body: Bytes) -> &'static str {
    state.0.lock().expect("mutex not poisoned").push(body);
    "accepted"
}

async fn start_mock_peer() -> (SocketAddr, ReceivedInbox) {
    let state = ReceivedInbox::default();
    let app = Router::new()
        .route("/users/bob/inbox", post(capture_inbox))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn test_data() -> Data<()> {
    FederationConfig::builder()
        .domain("bridge.example")
        .app_data(())
        .debug(true)
        .build()
        .unwrap()
        .to_request_data()
}

fn alice_accept() -> (Url, Accept) {
    let actor_id: Url = "https://bridge.example/users/did:plc:alice".parse().unwrap();
    let follow = Follow::new(
        "https://r.example/users/bob".parse().unwrap(),
        actor_id.clone(),
        "https://r.example/follows/1".parse().unwrap(),
    );
    let accept = Accept::new(
        actor_id.clone(),
        follow,
        "https://bridge.example/users/did:plc:alice/accept/1".parse().unwrap(),
    );
    (actor_id, accept)
}

/// Mirrors the teacher's `http_signatures::test::test_verify`: sign a request, then verify it
/// against the same headers, without any network round trip.
#[tokio::test]
async fn signed_accept_request_verifies_against_the_signer_s_public_key() {
    let (actor_id, _accept) = alice_accept();
    let keypair = generate_actor_keypair().unwrap();
    let inbox_url: Url = "https://r.example/users/bob/inbox".parse().unwrap();

    let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
    let request_builder = client.post(inbox_url.to_string());
    let request = sign_request(
        request_builder,
        &actor_id,
        "my activity".to_string(),
        keypair.private_key.clone(),
        false,
    )
    .await
    .unwrap();

    let valid = verify_signature(
        request.method(),
        &http::Uri::from_str(request.url().as_str()).unwrap(),
        request.headers(),
        &keypair.public_key,
    );
    assert!(valid.is_ok(), "{valid:?}");

    let digest = request.headers().get("digest");
    assert!(verify_body_hash(digest, b"my activity").is_ok());
    assert!(verify_body_hash(digest, b"a different body").is_err());
}

/// Drives an actual delivery through [`SendActivityTask`] against a real HTTP server playing
/// the remote peer, confirming the recipient sees exactly one POST to its inbox (spec §8
/// scenario 1).
#[tokio::test]
async fn accept_activity_is_delivered_to_the_remote_peer_s_inbox() {
    let (addr, inbox) = start_mock_peer().await;
    let inbox_url: Url = format!("http://{addr}/users/bob/inbox").parse().unwrap();

    let (actor_id, accept) = alice_accept();
    let keypair = generate_actor_keypair().unwrap();
    let data = test_data();

    let tasks = SendActivityTask::prepare(
        &accept,
        &actor_id,
        keypair.private_key,
        vec![inbox_url.clone()],
        &data,
        false,
    )
    .await
    .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].inbox, inbox_url);

    let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
    tasks[0].sign_and_send(&client).await.unwrap();

    let deliveries = inbox.0.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&deliveries[0]).unwrap();
    assert_eq!(body["type"], "Accept");
}

/// `prepare` must never hand the sender's own actor id back an inbox to deliver to itself
/// (spec §4.3 "discard if `repo` equals either bridge account DID", generalized here to the
/// dispatcher's own dedup rule for the sender's actor id appearing in the recipient list).
#[tokio::test]
async fn prepare_skips_the_senders_own_actor_id_among_recipients() {
    let (actor_id, accept) = alice_accept();
    let keypair = generate_actor_keypair().unwrap();
    let data = test_data();

    let tasks = SendActivityTask::prepare(
        &accept,
        &actor_id,
        keypair.private_key,
        vec![actor_id.clone(), "https://r.example/users/bob/inbox".parse().unwrap()],
        &data,
        false,
    )
    .await
    .unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].inbox.as_str(), "https://r.example/users/bob/inbox");
}
