//! Client for the chat DM XRPC surface named in spec §6. The chat API itself (and DM delivery
//! mechanics beyond this interface) are out of scope; this is only the collaborator surface the
//! engagement notifier calls through.

use crate::error::Error;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::json;

const CHAT_PROXY_HEADER: &str = "did:web:api.bsky.chat#bsky_chat";

#[derive(Clone)]
pub struct ChatClient {
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct GetConvoOutput {
    convo: Convo,
}

#[derive(Debug, Deserialize)]
struct Convo {
    id: String,
}

impl ChatClient {
    pub fn new(client: ClientWithMiddleware) -> Self {
        ChatClient { client }
    }

    /// Finds or creates the 1:1 conversation with `member_did`.
    async fn get_convo_for_members(
        &self,
        app_view_url: &str,
        access_jwt: &str,
        bridge_did: &str,
        member_did: &str,
    ) -> Result<String, Error> {
        let url = format!(
            "{}/xrpc/chat.bsky.convo.getConvoForMembers",
            app_view_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(access_jwt)
            .header("atproto-proxy", CHAT_PROXY_HEADER)
            .query(&[("members", member_did), ("members", bridge_did)])
            .send()
            .await
            .map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::transient(format!(
                "getConvoForMembers returned {}",
                response.status()
            )));
        }
        let output: GetConvoOutput = response.json().await.map_err(Error::from)?;
        Ok(output.convo.id)
    }

    /// Sends `text` as a DM from the bridge account to `member_did`, creating the conversation if
    /// needed (spec §4.8).
    pub async fn send_message(
        &self,
        app_view_url: &str,
        access_jwt: &str,
        bridge_did: &str,
        member_did: &str,
        text: &str,
    ) -> Result<(), Error> {
        let convo_id = self
            .get_convo_for_members(app_view_url, access_jwt, bridge_did, member_did)
            .await?;
        let url = format!(
            "{}/xrpc/chat.bsky.convo.sendMessage",
            app_view_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(access_jwt)
            .header("atproto-proxy", CHAT_PROXY_HEADER)
            .json(&json!({
                "convoId": convo_id,
                "message": { "text": text },
            }))
            .send()
            .await
            .map_err(Error::from)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::transient(format!(
                "sendMessage returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plain_client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[tokio::test]
    async fn send_message_finds_convo_then_posts_with_proxy_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/chat.bsky.convo.getConvoForMembers"))
            .and(header("atproto-proxy", CHAT_PROXY_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "convo": {"id": "convo-1"},
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xrpc/chat.bsky.convo.sendMessage"))
            .and(header("atproto-proxy", CHAT_PROXY_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = ChatClient::new(plain_client());
        client
            .send_message(&server.uri(), "jwt", "did:plc:bridge", "did:plc:alice", "hi there")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_message_fails_when_convo_lookup_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/chat.bsky.convo.getConvoForMembers"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ChatClient::new(plain_client());
        let err = client
            .send_message(&server.uri(), "jwt", "did:plc:bridge", "did:plc:alice", "hi there")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }
}
