//! Client for the external backlink discovery service ("Constellation"), treated as an opaque
//! HTTP source of reply references (spec §1, §6).

use crate::error::Error;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

#[derive(Clone)]
pub struct ConstellationClient {
    base_url: String,
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
pub struct BacklinksOutput {
    pub links: Vec<Backlink>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Backlink {
    /// atUri of the record that references `subject`, e.g. a reply's own atUri.
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl ConstellationClient {
    pub fn new(base_url: String, client: ClientWithMiddleware) -> Self {
        ConstellationClient { base_url, client }
    }

    /// `GET {source}/xrpc/…/getBacklinks?subject=&source=&limit=&cursor=` (spec §6).
    pub async fn get_backlinks(
        &self,
        subject: &str,
        source: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<BacklinksOutput, Error> {
        let url = format!(
            "{}/xrpc/blue.microcosm.links.getBacklinks",
            self.base_url.trim_end_matches('/')
        );
        let mut request = self.client.get(url).query(&[
            ("subject", subject),
            ("source", source),
            ("limit", &limit.to_string()),
        ]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await.map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::transient(format!(
                "getBacklinks returned {}",
                response.status()
            )));
        }
        response.json().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plain_client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[tokio::test]
    async fn get_backlinks_parses_links_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/blue.microcosm.links.getBacklinks"))
            .and(query_param("subject", "at://did:plc:alice/app.bsky.feed.post/k1"))
            .and(query_param("source", "app.bsky.feed.post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "links": [{"did": "did:plc:ext", "collection": "app.bsky.feed.post", "rkey": "r1"}],
                "cursor": "next-page",
            })))
            .mount(&server)
            .await;

        let client = ConstellationClient::new(server.uri(), plain_client());
        let output = client
            .get_backlinks(
                "at://did:plc:alice/app.bsky.feed.post/k1",
                "app.bsky.feed.post",
                50,
                None,
            )
            .await
            .unwrap();
        assert_eq!(output.links.len(), 1);
        assert_eq!(output.links[0].did, "did:plc:ext");
        assert_eq!(output.cursor.as_deref(), Some("next-page"));
    }

    #[tokio::test]
    async fn get_backlinks_surfaces_transient_error_on_server_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/blue.microcosm.links.getBacklinks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ConstellationClient::new(server.uri(), plain_client());
        let err = client
            .get_backlinks("at://did:plc:alice/app.bsky.feed.post/k1", "app.bsky.feed.post", 50, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }
}
