//! XRPC client for the PDS collaborator named in spec §6: account/session management, record
//! CRUD, blob upload/download, and identity resolution. The PDS itself is out of scope; this is
//! only the client surface the rest of the bridge calls through.

use crate::error::Error;
use reqwest_middleware::ClientWithMiddleware;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone)]
pub struct PdsClient {
    base_url: String,
    client: ClientWithMiddleware,
}

#[derive(Debug, Serialize)]
struct CreateSessionInput<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Session {
    pub did: String,
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountOutput {
    pub did: String,
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
}

#[derive(Debug, Serialize)]
struct CreateAccountInput<'a> {
    handle: &'a str,
    password: &'a str,
    #[serde(rename = "inviteCode", skip_serializing_if = "Option::is_none")]
    invite_code: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct GetRecordOutput {
    pub uri: String,
    pub cid: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordOutput {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveHandleOutput {
    pub did: String,
}

#[derive(Debug, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub cid_link: Value,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: i64,
}

/// Returned by `createAccount`/`refreshSession`/auth'd calls that fail with an expired token;
/// the caller (almost always [`crate::bridge_accounts::BridgeAccountManager`]) retries once
/// after a refresh.
#[derive(Debug, Deserialize)]
pub struct XrpcErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

impl PdsClient {
    pub fn new(base_url: String, client: ClientWithMiddleware) -> Self {
        PdsClient { base_url, client }
    }

    fn url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{nsid}", self.base_url.trim_end_matches('/'))
    }

    /// Builds the `subscribeRepos` WebSocket URL (spec §4.3), rewriting `http(s)` to `ws(s)` and
    /// attaching `cursor` when the caller wants replay from a known seq rather than a live tail.
    pub fn subscribe_repos_url(&self, cursor: Option<i64>) -> Result<String, Error> {
        let mut url = url::Url::parse(&self.url("com.atproto.sync.subscribeRepos"))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::permanent("failed to rewrite PDS url scheme"))?;
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
        }
        Ok(url.to_string())
    }

    pub async fn create_session(&self, identifier: &str, password: &str) -> Result<Session, Error> {
        self.post_public(
            "com.atproto.server.createSession",
            &CreateSessionInput { identifier, password },
        )
        .await
    }

    pub async fn refresh_session(&self, refresh_jwt: &str) -> Result<Session, Error> {
        let response = self
            .client
            .post(self.url("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .map_err(Error::from)?;
        Self::handle_response(response).await
    }

    pub async fn create_account(
        &self,
        handle: &str,
        password: &str,
        invite_code: Option<&str>,
    ) -> Result<CreateAccountOutput, Error> {
        self.post_public(
            "com.atproto.server.createAccount",
            &CreateAccountInput {
                handle,
                password,
                invite_code,
            },
        )
        .await
    }

    pub async fn resolve_handle(&self, handle: &str) -> Result<ResolveHandleOutput, Error> {
        let response = self
            .client
            .get(self.url("com.atproto.identity.resolveHandle"))
            .query(&[("handle", handle)])
            .send()
            .await
            .map_err(Error::from)?;
        Self::handle_response(response).await
    }

    pub async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<GetRecordOutput, Error> {
        let response = self
            .client
            .get(self.url("com.atproto.repo.getRecord"))
            .query(&[("repo", repo), ("collection", collection), ("rkey", rkey)])
            .send()
            .await
            .map_err(Error::from)?;
        Self::handle_response(response).await
    }

    pub async fn create_record(
        &self,
        access_jwt: &str,
        repo: &str,
        collection: &str,
        record: Value,
    ) -> Result<CreateRecordOutput, Error> {
        let body = serde_json::json!({
            "repo": repo,
            "collection": collection,
            "record": record,
        });
        let response = self
            .client
            .post(self.url("com.atproto.repo.createRecord"))
            .bearer_auth(access_jwt)
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;
        Self::handle_response(response).await
    }

    /// `com.atproto.repo.putRecord`: an idempotent upsert, used for the singleton
    /// `app.bsky.actor.profile` record at rkey `self` (spec §4.6/§4.7).
    pub async fn put_record(
        &self,
        access_jwt: &str,
        repo: &str,
        collection: &str,
        rkey: &str,
        record: Value,
    ) -> Result<CreateRecordOutput, Error> {
        let body = serde_json::json!({
            "repo": repo,
            "collection": collection,
            "rkey": rkey,
            "record": record,
        });
        let response = self
            .client
            .post(self.url("com.atproto.repo.putRecord"))
            .bearer_auth(access_jwt)
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;
        Self::handle_response(response).await
    }

    pub async fn delete_record(
        &self,
        access_jwt: &str,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<(), Error> {
        let body = serde_json::json!({
            "repo": repo,
            "collection": collection,
            "rkey": rkey,
        });
        let response = self
            .client
            .post(self.url("com.atproto.repo.deleteRecord"))
            .bearer_auth(access_jwt)
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;
        let _: Value = Self::handle_response(response).await?;
        Ok(())
    }

    /// Uploads raw bytes as a PDS blob, rejecting anything over 10 MiB (spec §5).
    pub async fn upload_blob(
        &self,
        access_jwt: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<BlobRef, Error> {
        const MAX_BLOB_BYTES: usize = 10 * 1024 * 1024;
        if bytes.len() > MAX_BLOB_BYTES {
            return Err(Error::permanent("blob exceeds 10 MiB limit"));
        }
        let response = self
            .client
            .post(self.url("com.atproto.repo.uploadBlob"))
            .bearer_auth(access_jwt)
            .header("content-type", mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(Error::from)?;
        #[derive(Deserialize)]
        struct UploadBlobOutput {
            blob: BlobRef,
        }
        let output: UploadBlobOutput = Self::handle_response(response).await?;
        Ok(output.blob)
    }

    /// `com.atproto.server.createInviteCode`, authenticated with the PDS admin token rather than
    /// a session JWT (spec §4.6: "acquire an invite code from PDS (best-effort)"). Returns `None`
    /// on any failure — open-registration PDS deployments have no invite codes at all, and the
    /// caller treats this as a non-fatal signal to omit `inviteCode` from `createAccount`.
    pub async fn create_invite_code(&self, admin_token: &str) -> Option<String> {
        #[derive(Serialize)]
        struct CreateInviteCodeInput {
            #[serde(rename = "useCount")]
            use_count: u32,
        }
        #[derive(Deserialize)]
        struct CreateInviteCodeOutput {
            code: String,
        }
        let response = self
            .client
            .post(self.url("com.atproto.server.createInviteCode"))
            .basic_auth("admin", Some(admin_token))
            .json(&CreateInviteCodeInput { use_count: 1 })
            .send()
            .await
            .ok()?;
        let output: CreateInviteCodeOutput = Self::handle_response(response).await.ok()?;
        Some(output.code)
    }

    /// Whether `did` is a repo hosted on this PDS (spec §4.2/§4.7 "local PDS account" checks).
    /// A read-only, unauthenticated XRPC lookup — safe to call from the otherwise-pure converter
    /// layer as a "PDSClient snapshot" read (spec §4.2 invariant).
    pub async fn describe_repo(&self, did: &str) -> Result<bool, Error> {
        let response = self
            .client
            .get(self.url("com.atproto.repo.describeRepo"))
            .query(&[("repo", did)])
            .send()
            .await
            .map_err(Error::from)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let _: Value = Self::handle_response(response).await?;
        Ok(true)
    }

    /// The PDS's base URL, used to construct `getBlob` URLs for embed attachments.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The shared, tracing-instrumented HTTP client, reused for attachment downloads so those
    /// requests get the same middleware stack as every XRPC call (spec §9).
    pub fn http_client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    pub async fn list_repos(&self, cursor: Option<&str>) -> Result<Value, Error> {
        let mut request = self.client.get(self.url("com.atproto.sync.listRepos"));
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await.map_err(Error::from)?;
        Self::handle_response(response).await
    }

    async fn post_public<B: Serialize, R: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &B,
    ) -> Result<R, Error> {
        let response = self
            .client
            .post(self.url(nsid))
            .json(body)
            .send()
            .await
            .map_err(Error::from)?;
        Self::handle_response(response).await
    }

    async fn handle_response<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, Error> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(Error::from)
        } else if status == reqwest::StatusCode::BAD_REQUEST {
            let body: XrpcErrorBody = response.json().await.unwrap_or(XrpcErrorBody {
                error: "Unknown".to_string(),
                message: String::new(),
            });
            if body.error == "ExpiredToken" || body.error == "InvalidToken" {
                Err(Error::Auth(body.error))
            } else {
                Err(Error::permanent(format!("{}: {}", body.error, body.message)))
            }
        } else if status.is_client_error() {
            Err(Error::permanent(format!("PDS returned {status}")))
        } else {
            Err(Error::transient(format!("PDS returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plain_client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[test]
    fn subscribe_repos_url_rewrites_scheme_and_carries_cursor() {
        let client = PdsClient::new("https://pds.example".to_string(), plain_client());
        let url = client.subscribe_repos_url(Some(42)).unwrap();
        assert_eq!(
            url,
            "wss://pds.example/xrpc/com.atproto.sync.subscribeRepos?cursor=42"
        );
    }

    #[tokio::test]
    async fn create_session_posts_credentials_and_parses_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .and(body_json(serde_json::json!({"identifier": "alice", "password": "hunter2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "did": "did:plc:alice",
                "accessJwt": "access",
                "refreshJwt": "refresh",
            })))
            .mount(&server)
            .await;

        let client = PdsClient::new(server.uri(), plain_client());
        let session = client.create_session("alice", "hunter2").await.unwrap();
        assert_eq!(session.did, "did:plc:alice");
        assert_eq!(session.access_jwt, "access");
    }

    #[tokio::test]
    async fn create_record_maps_expired_token_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "ExpiredToken",
                "message": "token expired",
            })))
            .mount(&server)
            .await;

        let client = PdsClient::new(server.uri(), plain_client());
        let err = client
            .create_record("stale-jwt", "did:plc:alice", "app.bsky.feed.post", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(kind) if kind == "ExpiredToken"));
    }

    #[tokio::test]
    async fn describe_repo_treats_404_as_not_local() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.repo.describeRepo"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = PdsClient::new(server.uri(), plain_client());
        let is_local = client.describe_repo("did:plc:stranger").await.unwrap();
        assert!(!is_local);
    }

    #[tokio::test]
    async fn create_invite_code_swallows_failure_and_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createInviteCode"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = PdsClient::new(server.uri(), plain_client());
        assert!(client.create_invite_code("bad-token").await.is_none());
    }

    #[tokio::test]
    async fn upload_blob_rejects_oversized_payload_without_a_network_call() {
        let client = PdsClient::new("https://pds.example".to_string(), plain_client());
        let oversized = vec![0u8; 10 * 1024 * 1024 + 1];
        let err = client
            .upload_blob("jwt", "image/png", oversized)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permanent(_)));
    }
}
