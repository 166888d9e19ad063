//! WebFinger (RFC 7033) resolution, grounded on the teacher's `fetch::webfinger`.

use crate::{config::Data, error::Error, fetch::object_id::ObjectId, traits::Object};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

static WEBFINGER_ACCT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^acct:([\p{L}0-9_\.\-]+)@(.*)$").expect("static regex is valid")
});

/// A WebFinger JRD response (`application/jrd+json`).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Webfinger {
    pub subject: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub links: Vec<WebfingerLink>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebfingerLink {
    pub rel: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Splits `acct:name@domain` into `(name, domain)`.
pub fn extract_webfinger_name(acct: &str) -> Result<(String, String), Error> {
    let captures = WEBFINGER_ACCT_REGEX
        .captures(acct)
        .ok_or(Error::WebfingerResolveFailed)?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// Builds the JRD body served at `/.well-known/webfinger` for a local actor.
pub fn build_webfinger_response(subject: String, actor_id: Url) -> Webfinger {
    build_webfinger_response_with_type(subject, actor_id, "Person")
}

/// As [`build_webfinger_response`], with an explicit ActivityStreams actor kind hint.
pub fn build_webfinger_response_with_type(
    subject: String,
    actor_id: Url,
    _kind: &str,
) -> Webfinger {
    Webfinger {
        subject,
        aliases: vec![actor_id.to_string()],
        links: vec![
            WebfingerLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                kind: Some("text/html".to_string()),
                href: Some(actor_id.to_string()),
            },
            WebfingerLink {
                rel: "self".to_string(),
                kind: Some("application/activity+json".to_string()),
                href: Some(actor_id.to_string()),
            },
            WebfingerLink {
                rel: "http://ostatus.org/schema/1.0/subscribe".to_string(),
                kind: None,
                href: Some(format!("{actor_id}?authorize_follow={{uri}}")),
            },
        ],
    }
}

/// Resolves `acct:name@domain` to a local actor type via WebFinger + [`ObjectId`] dereference.
pub async fn webfinger_resolve_actor<Kind>(
    identifier: &str,
    data: &Data<Kind::DataType>,
) -> Result<Kind, Error>
where
    Kind: Object + Send + 'static,
    Kind::Kind: DeserializeOwned,
    Kind::Error: From<Error> + Into<Error>,
{
    let (_name, domain) = extract_webfinger_name(identifier)?;
    let acct = if let Some(stripped) = identifier.strip_prefix("acct:") {
        stripped.to_string()
    } else {
        identifier.to_string()
    };
    let well_known = format!("https://{domain}/.well-known/webfinger?resource=acct:{acct}");
    let url = Url::parse(&well_known).map_err(|_| Error::WebfingerResolveFailed)?;
    data.config.verify_url_valid(&url).await?;

    let response = data
        .config
        .client
        .get(url.as_str())
        .header("accept", "application/jrd+json")
        .send()
        .await
        .map_err(|_| Error::WebfingerResolveFailed)?;
    let webfinger: Webfinger = response
        .json()
        .await
        .map_err(|_| Error::WebfingerResolveFailed)?;

    let actor_url = webfinger
        .links
        .iter()
        .find(|link| link.rel == "self")
        .and_then(|link| link.href.as_ref())
        .ok_or(Error::WebfingerResolveFailed)?;
    let actor_url = Url::parse(actor_url).map_err(|_| Error::WebfingerResolveFailed)?;

    ObjectId::<Kind>::from(actor_url)
        .dereference(data)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_webfinger_name_splits_acct_uri() {
        let (name, domain) = extract_webfinger_name("acct:alice@example.com").unwrap();
        assert_eq!(name, "alice");
        assert_eq!(domain, "example.com");
    }

    #[test]
    fn extract_webfinger_name_rejects_non_acct_strings() {
        assert!(extract_webfinger_name("https://example.com/alice").is_err());
    }

    #[test]
    fn build_webfinger_response_includes_self_link_for_actor() {
        let actor_id = Url::parse("https://bridge.example/users/did:plc:abc").unwrap();
        let jrd = build_webfinger_response("acct:abc@bridge.example".to_string(), actor_id.clone());
        assert_eq!(jrd.subject, "acct:abc@bridge.example");
        let self_link = jrd.links.iter().find(|l| l.rel == "self").unwrap();
        assert_eq!(self_link.href.as_deref(), Some(actor_id.as_str()));
        assert_eq!(self_link.kind.as_deref(), Some("application/activity+json"));
    }
}
